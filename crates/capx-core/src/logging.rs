//! Structured logging for capx
//!
//! Uses `tracing` with configurable output formats and destinations.
//!
//! - **Pretty format**: human-friendly output for interactive use
//! - **JSON format**: machine-parseable JSON lines for CI/ops
//! - **File output**: optional log file for diagnostic bundles
//!
//! Initialize once at startup; repeated calls are no-ops. The store itself
//! never surfaces errors to callers beyond `Result` values, so log lines are
//! the only user-visible failure signal. Levels matter: mirrored-write
//! and queue-entry failures are `warn`, successful mirrors are `debug`.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    /// Can be overridden by the RUST_LOG environment variable.
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to a log file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Idempotent: the first call wins, later calls return `Ok(())` without
/// touching the subscriber.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Runtime(format!("invalid log filter: {e}")))?;

    let result = match (&config.file, config.format) {
        (Some(path), LogFormat::Json) => {
            let file = Arc::new(std::fs::File::create(path)?);
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(file)
                .try_init()
        }
        (Some(path), LogFormat::Pretty) => {
            let file = Arc::new(std::fs::File::create(path)?);
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_env_filter(filter)
                .with_writer(file)
                .try_init()
        }
        (None, LogFormat::Json) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        (None, LogFormat::Pretty) => {
            tracing_subscriber::fmt().with_env_filter(filter).try_init()
        }
    };

    result.map_err(|e| Error::Runtime(format!("failed to init logging: {e}")))?;
    let _ = LOGGING_INITIALIZED.set(true);
    Ok(())
}
