//! Telemetry setup for the daemon
//!
//! This module provides:
//! - Console logging, pretty or JSON
//! - An optional rolling diagnostics file written through a non-blocking appender
//!
//! The outcome log (`INFO:`/`ERROR:` lines) is separate and owned by the
//! reporter; everything here is diagnostic output only.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

const DIAGNOSTICS_FILE: &str = "replicad.log";

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Use JSON instead of human-readable console output
    pub json_logging: bool,
    /// Enable console logging
    pub console_logging: bool,
    /// Directory for the rolling diagnostics log
    pub diagnostics_dir: Option<PathBuf>,
    /// Rotation frequency of the diagnostics log
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            console_logging: true,
            diagnostics_dir: None,
            rotation: Rotation::Daily,
        }
    }
}

impl TelemetryConfig {
    pub fn level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Default directives when `RUST_LOG` is not set
    fn default_filter(&self) -> String {
        let level = self.level();
        format!("replicad={0},replica_sync={0}", level)
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the diagnostics file when dropped and must be
/// held for the lifetime of the process.
pub fn init(config: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_logging {
        if config.json_logging {
            layers.push(fmt::layer().json().with_current_span(true).boxed());
        } else {
            layers.push(fmt::layer().with_target(false).boxed());
        }
    }

    let guard = match &config.diagnostics_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create diagnostics directory {}", dir.display())
            })?;

            let appender = match config.rotation {
                Rotation::Daily => rolling::daily(dir, DIAGNOSTICS_FILE),
                Rotation::Hourly => rolling::hourly(dir, DIAGNOSTICS_FILE),
                Rotation::Never => rolling::never(dir, DIAGNOSTICS_FILE),
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
