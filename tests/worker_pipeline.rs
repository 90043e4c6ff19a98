//! Integration tests driving the worker end-to-end (S4-S5) against an
//! in-process mock transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eventlog_forwarder::buffer::VolatileBuffer;
use eventlog_forwarder::error::TransportError;
use eventlog_forwarder::stats::StatsValue;
use eventlog_forwarder::transport::Transport;
use eventlog_forwarder::{Handler, HandlerConfig, LogRecord, LogstashFormatter};

#[derive(Default)]
struct MockTransport {
    fail: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
    send_calls: AtomicUsize,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, events: &[Bytes]) -> Result<(), TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::other("mock transport failure")));
        }
        self.sent.lock().unwrap().extend(events.iter().cloned());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn get_stats(&self) -> Vec<StatsValue> {
        Vec::new()
    }
}

fn tiny_tuning_config() -> HandlerConfig {
    let mut config = HandlerConfig {
        enable: true,
        ..Default::default()
    };
    config.tuning.queue_check_interval_secs = 0;
    config.tuning.flush_interval_secs = 0;
    config.tuning.flush_count = 1;
    config
}

// S4: worker + failing transport. Emitted events remain buffered and the
// transport records at least one failed send attempt.
#[tokio::test(flavor = "multi_thread")]
async fn s4_failing_transport_leaves_events_buffered() {
    let config = tiny_tuning_config();
    let formatter = Arc::new(LogstashFormatter::new("test", Vec::new()));
    let buffer = Arc::new(VolatileBuffer::new(None, None, None));
    let transport = Arc::new(MockTransport {
        fail: AtomicBool::new(true),
        ..Default::default()
    });

    let handler = Handler::with_components(config, formatter, buffer.clone(), transport.clone());

    handler.emit(&LogRecord::new("INFO", "m1"));
    handler.emit(&LogRecord::new("INFO", "m2"));

    // Give the worker a few idle cycles to attempt a flush.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(transport.send_calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(buffer.buffered_count(), 2);

    handler.close().await;
}

// S5: worker + healthy transport. All emitted messages reach the transport,
// in emission order (single producer).
#[tokio::test(flavor = "multi_thread")]
async fn s5_healthy_transport_delivers_all_messages_in_order() {
    let config = tiny_tuning_config();
    let formatter = Arc::new(LogstashFormatter::new("test", Vec::new()));
    let buffer = Arc::new(VolatileBuffer::new(None, None, None));
    let transport = Arc::new(MockTransport::default());

    let handler = Handler::with_components(config, formatter, buffer.clone(), transport.clone());

    for i in 0..100 {
        handler.emit(&LogRecord::new("INFO", format!("message-{i}")));
    }

    handler.close().await;

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 100);
    for (i, bytes) in sent.iter().enumerate() {
        let text = String::from_utf8_lossy(bytes);
        assert!(text.contains(&format!("message-{i}")));
    }
    assert_eq!(buffer.buffered_count(), 0);
}
