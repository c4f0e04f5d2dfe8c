//! `POST /api/chat` — validate, adapt, and hand off to the relay.
//!
//! The handler returns as soon as the request is validated: the response is a
//! `200` event stream whose body is fed by a spawned relay task. Validation is
//! the last point at which a real HTTP error status can be sent.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
        HeaderName,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, info, Instrument as _};

use crate::{
    adapter::{self, ChatRequest},
    error::ApiError,
    relay::{EventSink, SINK_CAPACITY},
    state::RelayState,
};

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/api/health", get(crate::api::health::health))
        .route("/api/chat", post(chat))
        .with_state(state)
}

pub async fn chat(
    State(state): State<Arc<RelayState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let (payload, resolution) = adapter::adapt(request, state.backend_model())?;

    info!(
        requested_model = resolution.requested_model.as_deref().unwrap_or("-"),
        resolved_model = %resolution.resolved_model,
        enable_thinking = resolution.enable_reasoning,
        thinking_explicit = resolution.reasoning_explicit,
        turns = payload.messages.len(),
        "relaying chat request"
    );

    let (sink, stream) = EventSink::channel(SINK_CAPACITY);
    tokio::spawn(
        async move {
            let outcome = state.relay.run(&payload, sink).await;
            debug!(?outcome, "relay finished");
        }
        .in_current_span(),
    );

    Ok(event_stream(Body::from_stream(stream)))
}

fn event_stream(body: Body) -> Response {
    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt; // oneshot
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::{
        config::{Config, Credential, UpstreamConfig},
        relay::{error_frame, INTERNAL_ERROR_MESSAGE, UPSTREAM_ERROR_MESSAGE},
        state::RelayState,
    };

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn state_with_upstream(base_url: &str) -> Arc<RelayState> {
        let config = Config {
            upstream: UpstreamConfig {
                base_url: base_url.into(),
                ..UpstreamConfig::default()
            },
            ..Config::default()
        };
        Arc::new(RelayState::new(Arc::new(config), &Credential::new("sk-test")).unwrap())
    }

    fn app_for(server: &MockServer) -> axum::Router {
        crate::api::app(state_with_upstream(&format!("{}/v1", server.uri())))
    }

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn body_bytes(body: Body) -> Vec<u8> {
        to_bytes(body, usize::MAX).await.unwrap().to_vec()
    }

    async fn body_json(body: Body) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(body).await).unwrap()
    }

    async fn upstream_never_called() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        server
    }

    // -----------------------------------------------------------------------
    // GET /api/health
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn health_returns_200_ok_without_upstream_traffic() {
        let server = upstream_never_called().await;
        let req = Request::builder()
            .method("GET")
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();

        let resp = app_for(&server).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["status"], "ok");
        assert!(json["message"].is_string());
    }

    // -----------------------------------------------------------------------
    // POST /api/chat — validation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_body_returns_400_and_skips_upstream() {
        let server = upstream_never_called().await;

        let resp = app_for(&server).oneshot(chat_request(json!({}))).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp.into_body()).await;
        assert!(json["error"].is_string(), "missing error field: {json}");
    }

    #[tokio::test]
    async fn empty_message_and_history_return_400() {
        let server = upstream_never_called().await;

        let resp = app_for(&server)
            .oneshot(chat_request(json!({ "message": "", "messages": [] })))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_returns_400_with_json_error() {
        let server = upstream_never_called().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let resp = app_for(&server).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp.into_body()).await;
        assert!(json["error"].is_string());
    }

    // -----------------------------------------------------------------------
    // POST /api/chat — streaming
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn chat_streams_upstream_body_with_event_stream_headers() {
        let upstream_body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "deepseek-v3",
                "messages": [{ "role": "user", "content": "hello" }],
                "stream": true,
                "enable_thinking": false,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(upstream_body.as_bytes().to_vec(), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resp = app_for(&server)
            .oneshot(chat_request(json!({ "message": "hello" })))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["connection"], "keep-alive");
        assert_eq!(body_bytes(resp.into_body()).await, upstream_body.as_bytes());
    }

    #[tokio::test]
    async fn chat_forwards_history_and_legacy_reasoning_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "deepseek-v3",
                "messages": [
                    { "role": "system", "content": "terse" },
                    { "role": "user", "content": "2+2?" },
                ],
                "enable_thinking": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("data: [DONE]\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = app_for(&server)
            .oneshot(chat_request(json!({
                "model": "deepseek-r1",
                "message": "ignored when history is present",
                "messages": [
                    { "role": "system", "content": "terse" },
                    { "role": "user", "content": "2+2?" },
                ],
            })))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp.into_body()).await, b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn upstream_error_is_reported_in_band_with_status_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = app_for(&server)
            .oneshot(chat_request(json!({ "message": "hello" })))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        let body = body_bytes(resp.into_body()).await;
        assert_eq!(body, error_frame(UPSTREAM_ERROR_MESSAGE).to_vec());
    }

    #[tokio::test]
    async fn unreachable_upstream_is_reported_in_band_with_status_200() {
        // Port 1 is reserved and never responds — guaranteed connection refusal.
        let app = crate::api::app(state_with_upstream("http://127.0.0.1:1/v1"));

        let resp = app.oneshot(chat_request(json!({ "message": "hello" }))).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_bytes(resp.into_body()).await;
        assert_eq!(body, error_frame(INTERNAL_ERROR_MESSAGE).to_vec());
    }

    // -----------------------------------------------------------------------
    // Middleware
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn request_id_is_echoed_back() {
        let server = upstream_never_called().await;
        let req = Request::builder()
            .method("GET")
            .uri("/api/health")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();

        let resp = app_for(&server).oneshot(req).await.unwrap();
        assert_eq!(resp.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn request_id_is_generated_when_absent() {
        let server = upstream_never_called().await;
        let resp = app_for(&server).oneshot(chat_request(json!({}))).await.unwrap();
        let id = resp.headers()["x-request-id"].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok(), "not a uuid: {id}");
    }

    #[tokio::test]
    async fn cors_preflight_is_answered() {
        let server = upstream_never_called().await;
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/chat")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let resp = app_for(&server).oneshot(req).await.unwrap();
        assert!(resp.status().is_success());
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }
}
