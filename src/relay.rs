//! Streaming relay — the upstream body, chunk by chunk, into the caller's response.
//!
//! By the time [`Relay::run`] starts, the caller already has a `200` with
//! event-stream headers; the response body is the receiving half of an
//! [`EventSink`]. Every outcome therefore has to be expressed inside the
//! stream:
//!
//! | Upstream behaviour | Caller sees |
//! |---|---|
//! | 2xx, body ends cleanly | the upstream bytes, in order, then EOF |
//! | non-2xx | one `data: {"error": ...}` frame, then EOF |
//! | connect or mid-body failure | bytes forwarded so far, one error frame, then EOF |
//! | caller goes away | nothing; the upstream response is dropped |
//!
//! [`EventSink`] is consumed by whichever path ends the relay, so the caller's
//! stream is closed exactly once.

use std::{convert::Infallible, fmt::Display};

use bytes::Bytes;
use futures_util::{Stream, StreamExt as _};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{adapter::UpstreamPayload, upstream::UpstreamClient};

/// Client-facing text when the upstream answered with a non-2xx status.
pub const UPSTREAM_ERROR_MESSAGE: &str = "upstream API call failed";

/// Client-facing text for network failures. Details stay in the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Chunks buffered between the relay task and the caller's connection.
pub const SINK_CAPACITY: usize = 32;

/// How much of an upstream error body is read for the log.
pub const ERROR_BODY_LIMIT: usize = 4 * 1024;

/// How a single relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The upstream body was forwarded in full.
    Completed { chunks: usize, bytes: usize },
    /// The upstream rejected the request; an error frame was sent.
    UpstreamFailed { status: u16 },
    /// The connection or body read failed; an error frame was sent after
    /// `bytes` bytes of the body.
    TransportFailed { bytes: usize },
    /// The caller disconnected after receiving `bytes` bytes.
    Abandoned { bytes: usize },
}

/// Write half of the caller's streaming response.
///
/// Dropping the sink ends the caller's response body.
pub struct EventSink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl EventSink {
    /// Create a sink and the byte stream that feeds the caller's response body.
    pub fn channel(
        capacity: usize,
    ) -> (Self, impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        (Self { tx }, stream)
    }

    /// Forward one chunk, waiting for room if the caller is slow.
    ///
    /// Fails only when the caller's side is gone.
    async fn write(&self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(Ok(chunk)).await.map_err(|_| SinkClosed)
    }

    /// Resolves once the caller's side has been dropped.
    async fn closed(&self) {
        self.tx.closed().await
    }

    /// Send the terminal in-band error frame and close.
    async fn fail(self, message: &str) {
        // A caller that already left cannot be told anything.
        let _ = self.tx.send(Ok(error_frame(message))).await;
    }

    fn close(self) {}
}

#[derive(Debug)]
struct SinkClosed;

/// `data: {"error":"<message>"}\n\n`
pub fn error_frame(message: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", json!({ "error": message })))
}

/// Performs relays against one upstream. Shared by all requests.
pub struct Relay {
    upstream: UpstreamClient,
    log_first_chunk: bool,
}

impl Relay {
    pub fn new(upstream: UpstreamClient, log_first_chunk: bool) -> Self {
        Self {
            upstream,
            log_first_chunk,
        }
    }

    pub fn upstream_url(&self) -> &str {
        self.upstream.url()
    }

    /// Issue the upstream call for `payload` and stream its answer into `sink`.
    ///
    /// Makes exactly one upstream attempt. Never fails: every error becomes an
    /// in-band frame and a [`RelayOutcome`].
    pub async fn run(&self, payload: &UpstreamPayload, sink: EventSink) -> RelayOutcome {
        let response = tokio::select! {
            biased;
            _ = sink.closed() => {
                info!("client disconnected before upstream responded");
                return RelayOutcome::Abandoned { bytes: 0 };
            }
            result = self.upstream.send(payload) => result,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                error!(error = %format!("{e:#}"), "upstream request failed");
                sink.fail(INTERNAL_ERROR_MESSAGE).await;
                return RelayOutcome::TransportFailed { bytes: 0 };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = tokio::select! {
                biased;
                _ = sink.closed() => {
                    info!(%status, "client disconnected while reading upstream error body");
                    return RelayOutcome::Abandoned { bytes: 0 };
                }
                text = read_error_body(response.bytes_stream(), ERROR_BODY_LIMIT) => text,
            };
            warn!(%status, body = %text, "upstream returned an error");
            sink.fail(UPSTREAM_ERROR_MESSAGE).await;
            return RelayOutcome::UpstreamFailed {
                status: status.as_u16(),
            };
        }

        pump(response.bytes_stream(), sink, self.log_first_chunk).await
    }
}

/// Read at most `limit` bytes of an error body, lossily decoded.
///
/// Stops at the limit even if the upstream keeps sending.
pub async fn read_error_body<S, E>(body: S, limit: usize) -> String
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    futures_util::pin_mut!(body);
    let mut buf = Vec::new();

    while buf.len() < limit {
        match body.next().await {
            None => break,
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Some(Err(e)) => {
                let mut text = String::from_utf8_lossy(&buf).into_owned();
                text.push_str(&format!("<error body read failed: {e}>"));
                return text;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Copy `body` into `sink` until it ends, fails, or the caller leaves.
///
/// Chunks are forwarded as they arrive, in order; nothing is buffered beyond
/// the sink's channel.
pub async fn pump<S, E>(body: S, sink: EventSink, log_first_chunk: bool) -> RelayOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    futures_util::pin_mut!(body);
    let mut chunks = 0usize;
    let mut bytes = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.closed() => {
                info!(bytes, "client disconnected — abandoning upstream stream");
                return RelayOutcome::Abandoned { bytes };
            }
            next = body.next() => next,
        };

        match next {
            None => break,
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                if chunks == 0 && log_first_chunk {
                    debug!(chunk = %String::from_utf8_lossy(&chunk), "first upstream chunk");
                }
                let len = chunk.len();
                if sink.write(chunk).await.is_err() {
                    info!(bytes, "client disconnected — abandoning upstream stream");
                    return RelayOutcome::Abandoned { bytes };
                }
                chunks += 1;
                bytes += len;
            }
            Some(Err(e)) => {
                error!(error = %e, bytes, "upstream stream failed mid-body");
                sink.fail(INTERNAL_ERROR_MESSAGE).await;
                return RelayOutcome::TransportFailed { bytes };
            }
        }
    }

    sink.close();
    debug!(chunks, bytes, "upstream stream complete");
    RelayOutcome::Completed { chunks, bytes }
}
