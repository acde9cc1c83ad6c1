//! Request logging.
//!
//! One access line per request and one error line per failed VC request,
//! correlated by a per-process request id that travels through the router
//! rather than any global request state.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::Method;
use log::{error, info, LevelFilter};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Initialize the process logger at the configured level.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

/// Hand out the next request id.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Access line, emitted once per request after the response is built.
pub fn log_request(
    request_id: u64,
    method: &Method,
    path: &str,
    status: u16,
    elapsed: Duration,
) {
    info!(
        "{method} {path} status={status} elapsed_ms={} request_id={request_id}",
        elapsed.as_millis()
    );
}

/// Outcome callback for VC requests: emits a single error line when the
/// handler produced an internal error, and nothing otherwise.
pub fn log_vc_outcome<E: Display>(
    request_id: u64,
    method: &Method,
    path: &str,
    outcome: Option<&E>,
) {
    if let Some(err) = outcome {
        error!("{method} {path} failed: {err} request_id={request_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_and_increasing() {
        let first = next_request_id();
        let second = next_request_id();
        assert!(second > first);
    }
}
