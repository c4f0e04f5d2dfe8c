//! HTTP client for the upstream chat-completions API.
//!
//! Built once at startup: the credential is baked into the client's default
//! headers, so nothing downstream ever handles the key again. [`reqwest::Client`]
//! pools connections internally and is shared by every in-flight relay.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, Client, Response};

use crate::{
    adapter::UpstreamPayload,
    config::{Credential, UpstreamConfig},
};

pub struct UpstreamClient {
    client: Client,
    url: String,
}

impl UpstreamClient {
    /// Construct a client that authenticates with `credential`.
    ///
    /// No request-level timeout is set: a streamed answer has no natural upper
    /// bound. Only connection establishment is bounded, when configured.
    pub fn new(cfg: &UpstreamConfig, credential: &Credential) -> anyhow::Result<Self> {
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .context("invalid API key value for Authorization header")?;
        auth.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let mut builder = Client::builder().default_headers(headers);
        if let Some(ms) = cfg.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            url: cfg.chat_completions_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `payload` and return the response as soon as headers arrive.
    ///
    /// The status is not checked here; the relay decides what a non-2xx means
    /// for the caller. The body is left unread so it can be streamed.
    pub async fn send(&self, payload: &UpstreamPayload) -> anyhow::Result<Response> {
        self.client
            .post(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .json(payload)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))
    }
}
