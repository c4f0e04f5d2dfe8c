//! Tracing subscriber setup.
//!
//! Logs always go to stderr. With `logging.file` set they are also appended,
//! without ANSI colours, to that file through a non-blocking writer; the
//! returned [`WorkerGuard`] must live until shutdown or buffered lines are lost.
//!
//! Filtering follows `RUST_LOG`, defaulting to [`DEFAULT_FILTER`].

use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

use crate::config::LoggingConfig;

pub const DEFAULT_FILTER: &str = "deepseek_relay=info,tower_http=warn";

pub fn init(cfg: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match &cfg.file {
        Some(path) => {
            let file = open_append(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

/// Open `path` for appending, creating it and its parent directories.
fn open_append(path: &Path) -> anyhow::Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
