//! Request ID middleware.
//!
//! Every inbound request gets an `X-Request-ID`, taken from the caller when
//! present or freshly generated (UUID v4) otherwise. The ID is echoed in the
//! response header and recorded on a span that wraps the handler. The chat
//! handler carries that span into its relay task, so the log lines of a stream
//! that outlives its handler still carry the caller's ID.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument as _;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Apply **inside** `tower_http::TraceLayer` so the span nests under it.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }

    response
}
