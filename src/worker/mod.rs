//! Worker component (§4.4): the single background task that drains the
//! ingress queue into the buffer and flushes the buffer to the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use prometheus::IntGauge;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::config::HandlerConfig;
use crate::diagnostics::safe_log;
use crate::error::BufferError;
use crate::event::Event;
use crate::rate_limit::{rate_limit_key, RateLimiter};
use crate::stats::{StatsBundle, StatsValue};
use crate::transport::Transport;

/// Shared shutdown/flush signaling between the handler and its worker task.
#[derive(Debug)]
pub(crate) struct WorkerSignals {
    shutdown: AtomicBool,
    force_flush: AtomicBool,
    notify: Notify,
}

impl WorkerSignals {
    fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            force_flush: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn request_flush(&self) {
        self.force_flush.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn take_force_flush(&self) -> bool {
        self.force_flush.swap(false, Ordering::SeqCst)
    }
}

/// Handle retained by the handler: the ingress sender plus the shared signals
/// and stats, and a join handle for clean shutdown.
pub(crate) struct WorkerHandle {
    pub(crate) sender: mpsc::UnboundedSender<Bytes>,
    pub(crate) signals: Arc<WorkerSignals>,
    pub(crate) stats: Arc<WorkerStats>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal shutdown, then wait for the worker task to exit.
    pub(crate) async fn shutdown(&mut self) {
        self.signals.request_shutdown();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                safe_log(&format!("worker task panicked during shutdown: {e}"));
            }
        }
    }
}

/// Worker-owned counters, kept separate from [`StatsBundle`] only for the
/// `queue_size` gauge (§6), which no other subsystem needs.
#[derive(Debug)]
pub(crate) struct WorkerStats {
    bundle: StatsBundle,
    queue_size: IntGauge,
}

impl WorkerStats {
    fn new() -> Self {
        let bundle = StatsBundle::new("eventlog_worker_");
        let queue_size = IntGauge::new("eventlog_worker_queue_size", "ingress queue depth")
            .expect("static metric name/help are valid");
        bundle
            .registry()
            .register(Box::new(queue_size.clone()))
            .expect("metric not already registered");
        Self { bundle, queue_size }
    }

    pub(crate) fn snapshot(&self) -> Vec<StatsValue> {
        self.bundle.snapshot()
    }
}

/// Spawn the worker task, returning a handle the handler retains for the
/// lifetime of the process (or until `shutdown`).
pub(crate) fn spawn(
    config: Arc<HandlerConfig>,
    buffer: Arc<dyn Buffer>,
    transport: Arc<dyn Transport>,
) -> WorkerHandle {
    let (sender, receiver) = mpsc::unbounded_channel();
    let signals = Arc::new(WorkerSignals::new());
    let stats = Arc::new(WorkerStats::new());

    let task_signals = signals.clone();
    let task_stats = stats.clone();
    let join = tokio::spawn(run(config, buffer, transport, receiver, task_signals, task_stats));

    WorkerHandle {
        sender,
        signals,
        stats,
        join: Some(join),
    }
}

struct FlushCounters {
    last_flush: Instant,
    writes_since_flush: u64,
}

/// Main worker loop (§4.4). `held` is the event most recently popped from the
/// ingress queue but not yet durably buffered - on a transient `add_event`
/// failure it stays here rather than going back through the channel, so a
/// single stuck event can't reorder everything behind it.
async fn run(
    config: Arc<HandlerConfig>,
    buffer: Arc<dyn Buffer>,
    transport: Arc<dyn Transport>,
    mut receiver: mpsc::UnboundedReceiver<Bytes>,
    signals: Arc<WorkerSignals>,
    stats: Arc<WorkerStats>,
) {
    let mut limiter = match &config.rate_limit {
        Some(rl) => RateLimiter::new(rl.limit, Duration::from_secs(rl.window_secs)),
        None => RateLimiter::disabled(),
    };
    let mut counters = FlushCounters {
        last_flush: Instant::now(),
        writes_since_flush: 0,
    };
    let queue_check = config.tuning.queue_check_interval();
    let flush_interval = config.tuning.flush_interval();
    let flush_count = config.tuning.flush_count;

    let mut held: Option<Bytes> = None;

    loop {
        stats.queue_size.set(receiver.len() as i64);

        let payload = match held.take() {
            Some(payload) => Some(payload),
            None => match receiver.try_recv() {
                Ok(payload) => Some(payload),
                Err(mpsc::error::TryRecvError::Empty) => None,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    flush(&buffer, &transport, &stats, &mut limiter, &mut counters, true).await;
                    break;
                }
            },
        };

        if let Some(payload) = payload {
            let event = Event::new(payload.clone());
            let past_shutdown = signals.is_shutdown();
            match buffer.add_event(event).await {
                Ok(()) => {
                    counters.writes_since_flush += 1;
                }
                Err(BufferError::Locked) => {
                    log_rate_limited(
                        &mut limiter,
                        "buffer",
                        "Locked",
                        None,
                        "buffer locked, retrying event later",
                        past_shutdown,
                    );
                    held = Some(payload);
                    tokio::time::sleep(queue_check).await;
                }
                Err(e) => {
                    log_rate_limited(
                        &mut limiter,
                        "buffer",
                        "Error",
                        None,
                        &format!("add_event failed: {e}"),
                        past_shutdown,
                    );
                    held = Some(payload);
                    tokio::time::sleep(queue_check).await;
                }
            }
            continue;
        }

        if signals.is_shutdown() {
            flush(&buffer, &transport, &stats, &mut limiter, &mut counters, true).await;
            break;
        }

        let forced = signals.take_force_flush();
        let due = forced
            || counters.last_flush.elapsed() >= flush_interval
            || counters.writes_since_flush >= flush_count;
        if due {
            flush(&buffer, &transport, &stats, &mut limiter, &mut counters, false).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(queue_check) => {}
            _ = signals.notify.notified() => {}
        }

        if let Err(e) = buffer.expire_events().await {
            log_rate_limited(
                &mut limiter,
                "buffer",
                "ExpireError",
                None,
                &format!("expire_events failed: {e}"),
                signals.is_shutdown(),
            );
        }
    }

    if receiver.try_recv().is_ok() {
        safe_log("worker exiting with a non-empty ingress queue");
    }
}

/// Flush algorithm (§4.4.1): fetch whatever is buffered, ship it, then settle
/// the buffer according to the transport's result.
async fn flush(
    buffer: &Arc<dyn Buffer>,
    transport: &Arc<dyn Transport>,
    stats: &Arc<WorkerStats>,
    limiter: &mut RateLimiter,
    counters: &mut FlushCounters,
    past_shutdown: bool,
) {
    let events = match buffer.get_queued_events().await {
        Ok(events) => events,
        Err(e) => {
            log_rate_limited(
                limiter,
                "buffer",
                "FlushFetchError",
                None,
                &format!("get_queued_events failed: {e}"),
                past_shutdown,
            );
            return;
        }
    };

    if events.is_empty() {
        return;
    }

    let payloads: Vec<Bytes> = events.iter().map(|e| e.payload.clone()).collect();
    match transport.send(&payloads).await {
        Ok(()) => {
            counters.last_flush = Instant::now();
            counters.writes_since_flush = 0;
            if let Err(e) = buffer.delete_queued_events().await {
                debug!(error = %e, "delete_queued_events failed after successful send; rows will be retried");
            }
            stats.bundle.send(events.len() as u64);
        }
        Err(e) => {
            log_rate_limited(
                limiter,
                "transport",
                "SendError",
                None,
                &format!("transport send failed: {e}"),
                past_shutdown,
            );
            if let Err(requeue_err) = buffer.requeue_queued_events(&events).await {
                warn!(error = %requeue_err, "requeue_queued_events failed after send failure");
            }
        }
    }
}

/// Route a rate-limited diagnostic through `tracing`, or - once the worker is
/// on its shutdown path - through the fallback stderr sink instead (§4.4.2).
fn log_rate_limited(
    limiter: &mut RateLimiter,
    module: &str,
    class: &str,
    errno: Option<i32>,
    message: &str,
    past_shutdown: bool,
) {
    let key = rate_limit_key(module, class, errno);
    let remaining = limiter.hit(&key);
    if remaining == 0 {
        return;
    }

    let full_message = if remaining == 1 {
        format!("{message} (rate limiting effective, further equal messages will be limited)")
    } else {
        message.to_string()
    };

    if past_shutdown {
        safe_log(&full_message);
    } else {
        warn!("{full_message}");
    }
}
