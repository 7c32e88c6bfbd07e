use chrono::Utc;
use http::Request;
use std::sync::atomic::{AtomicU64, Ordering};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<unix millis>:<pid>:<counter>`, unique within one process.
pub fn next_request_id() -> String {
    format!(
        "{}:{}:{}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Prefers an id the client or a proxy already assigned.
pub fn request_id<B>(req: &Request<B>) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(next_request_id)
}
