//! Configuration types for deepseek-relay.
//!
//! Config is resolved once at startup and validated before the server opens a
//! port. Every field has a default, so the relay runs with nothing but the
//! upstream API key in the environment; a TOML file (path in `RELAY_CONFIG`)
//! can override any of them.
//!
//! # Example
//! ```toml
//! [server]
//! port = 3000
//!
//! [upstream]
//! base_url    = "https://dashscope.aliyuncs.com/compatible-mode/v1"
//! model       = "deepseek-v3"
//! api_key_env = "DEEPSEEK_API_KEY"
//!
//! [logging]
//! file = "logs/relay.log"
//! ```

use std::{fmt, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the startup config: the file named by `RELAY_CONFIG` (or the
    /// built-in defaults when unset), then the `PORT` override.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = match std::env::var_os("RELAY_CONFIG") {
            Some(path) => Self::load(Path::new(&path))
                .with_context(|| format!("failed to load config from {}", path.to_string_lossy()))?,
            None => Self::default(),
        };

        let config = config.with_port_override(std::env::var("PORT").ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply a `PORT`-style override. Empty values are ignored.
    pub fn with_port_override(mut self, port: Option<&str>) -> anyhow::Result<Self> {
        if let Some(raw) = port.map(str::trim).filter(|p| !p.is_empty()) {
            self.server.port = raw
                .parse()
                .with_context(|| format!("PORT `{raw}` is not a valid port number"))?;
        }
        Ok(self)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.server.port != 0, "server.port must be non-zero");

        anyhow::ensure!(
            !self.upstream.model.trim().is_empty(),
            "upstream.model must not be empty"
        );

        let base = self.upstream.base_url.as_str();
        anyhow::ensure!(
            base.starts_with("http://") || base.starts_with("https://"),
            "upstream.base_url `{base}` must start with http:// or https://"
        );

        anyhow::ensure!(
            !self.upstream.api_key_env.trim().is_empty(),
            "upstream.api_key_env must name an environment variable"
        );

        Ok(())
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port for the client-facing API (default: 3000, env `PORT` overrides).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Send permissive CORS headers (default: true).
    ///
    /// The browser client is usually served from a different origin than the
    /// relay, so this is on unless the relay sits behind a same-origin proxy.
    #[serde(default = "defaults::cors")]
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            cors: defaults::cors(),
        }
    }
}

/// The single upstream chat-completions API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL including the API version segment; `/chat/completions` is appended.
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Model identifier sent upstream on every request, whatever the caller asked for.
    #[serde(default = "defaults::model")]
    pub model: String,

    /// Environment variable whose value is the upstream API key.
    #[serde(default = "defaults::api_key_env")]
    pub api_key_env: String,

    /// Upper bound on establishing the upstream connection, in milliseconds.
    ///
    /// There is deliberately no whole-request timeout: a streamed answer can
    /// legitimately run for minutes.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            model: defaults::model(),
            api_key_env: defaults::api_key_env(),
            connect_timeout_ms: None,
        }
    }
}

impl UpstreamConfig {
    /// Resolve the API key from the configured environment variable.
    ///
    /// Called once at startup; a missing key is fatal because every chat
    /// request would fail anyway.
    pub fn credential(&self) -> anyhow::Result<Credential> {
        let key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| format!("environment variable {} is not set", self.api_key_env))?;
        Ok(Credential::new(key))
    }

    /// Full URL of the chat-completions endpoint.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Log output settings. Console output is always on; see [`crate::telemetry`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Append-only log file, in addition to stderr.
    #[serde(default)]
    pub file: Option<std::path::PathBuf>,

    /// Log the first streamed chunk of every response at debug level.
    ///
    /// Off by default: the chunk contains model output, which may be sensitive.
    #[serde(default)]
    pub log_first_chunk: bool,
}

/// Upstream API key. `Debug` never prints the value.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

mod defaults {
    pub fn port() -> u16 { 3000 }
    pub fn cors() -> bool { true }
    pub fn base_url() -> String { "https://dashscope.aliyuncs.com/compatible-mode/v1".into() }
    pub fn model() -> String { "deepseek-v3".into() }
    pub fn api_key_env() -> String { "DEEPSEEK_API_KEY".into() }
}
