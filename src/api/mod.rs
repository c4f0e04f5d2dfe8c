//! Client-facing HTTP surface.

use std::sync::Arc;

use axum::Router;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::state::RelayState;

pub mod chat;
pub mod health;
pub mod request_id;

/// The full application: routes plus request-id, CORS and trace layers.
pub fn app(state: Arc<RelayState>) -> Router {
    let cors = state.config.server.cors;
    let mut app = chat::router(state)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware));

    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
    )
}
