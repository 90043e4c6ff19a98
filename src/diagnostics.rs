//! Fallback diagnostic sink (§4.4.2). Once the worker is on its shutdown
//! path, the `tracing` subscriber it reports through may already be torn
//! down or tearing down alongside the host application - routing a
//! diagnostic through it risks re-entering the pipeline that is exiting.
//! This sink writes straight to standard error instead.

use std::io::Write;

/// Write `message` directly to standard error, bypassing `tracing`.
pub(crate) fn safe_log(message: &str) {
    let _ = writeln!(std::io::stderr(), "eventlog-forwarder: {message}");
}
