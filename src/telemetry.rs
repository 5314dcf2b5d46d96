//! Logging bootstrap.
//!
//! - Output: human-readable text or flattened JSON, RFC 3339 UTC timestamps.
//! - Filter: explicit directive string, else `RUST_LOG`, else `info`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Logging section of the settings file (`[logging]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directive string such as `"info,tokensale_ledger=debug"`.
    pub filter: Option<String>,
    /// JSON lines instead of text.
    pub json: bool,
    /// Print target, file and line.
    pub with_targets_and_lines: bool,
    /// ANSI colours (text format only).
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: None, json: false, with_targets_and_lines: false, ansi: true }
    }
}

impl LoggingConfig {
    /// Resolve the filter; an unparsable directive falls back to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        match self.filter.as_deref() {
            Some(s) => EnvFilter::try_new(s).unwrap_or_else(|_| EnvFilter::new("info")),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

/// Install the global subscriber. Call once at process start.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let base = fmt::layer()
        .with_target(cfg.with_targets_and_lines)
        .with_file(cfg.with_targets_and_lines)
        .with_line_number(cfg.with_targets_and_lines)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let fmt_layer = if cfg.json {
        base.json()
            .with_ansi(false)
            .with_current_span(true)
            .flatten_event(true)
            .boxed()
    } else {
        base.with_ansi(cfg.ansi).boxed()
    };

    Registry::default()
        .with(cfg.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("install tracing subscriber")
}
