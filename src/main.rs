use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

mod adapter;
mod api;
mod config;
mod error;
mod relay;
mod state;
mod telemetry;
mod upstream;

pub use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /api/health and exit immediately.
    // This avoids needing any external tool (curl/wget) in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    // A missing .env is the normal case; a malformed one is an error.
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("loading .env"),
    }

    let config = Config::from_env()?;
    let _log_guard = telemetry::init(&config.logging)?;

    let credential = config
        .upstream
        .credential()
        .inspect_err(|e| error!(error = %e, "refusing to start without an upstream API key"))?;

    let config = Arc::new(config);
    let state = Arc::new(state::RelayState::new(Arc::clone(&config), &credential)?);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        %addr,
        upstream = %state.relay.upstream_url(),
        model = %config.upstream.model,
        log_file = ?config.logging.file,
        "deepseek-relay listening"
    );

    let app = api::app(state);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// `deepseek-relay --healthcheck`: GET /api/health on the local port, exit 0 on 200.
async fn healthcheck() -> anyhow::Result<()> {
    let port = healthcheck_port(Config::from_env());

    let url = format!("http://127.0.0.1:{port}/api/health");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

/// The port the running relay listens on, as far as the config can tell.
///
/// An unreadable config still gets a probe on the default port.
fn healthcheck_port(config: anyhow::Result<Config>) -> u16 {
    config
        .map(|c| c.server.port)
        .unwrap_or_else(|_| Config::default().server.port)
}
