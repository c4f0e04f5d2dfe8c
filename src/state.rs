//! Shared application state injected into every handler via [`axum::extract::State`].

use std::sync::Arc;

use crate::{
    config::{Config, Credential},
    relay::Relay,
    upstream::UpstreamClient,
};

/// Immutable after startup; concurrent relays share nothing mutable.
pub struct RelayState {
    pub config: Arc<Config>,
    pub relay: Relay,
}

impl RelayState {
    pub fn new(config: Arc<Config>, credential: &Credential) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream, credential)?;
        let relay = Relay::new(upstream, config.logging.log_first_chunk);
        Ok(Self { config, relay })
    }

    /// The model every upstream request is sent with.
    pub fn backend_model(&self) -> &str {
        &self.config.upstream.model
    }
}
