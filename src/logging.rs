//! Tracing subscriber setup for the binaries

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` wins over `config.filter`. With `log_to_file` set, output is
/// appended to `config.file` without ANSI colors.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| Error::config("logging.filter", e.to_string()))?;

    let installed = if config.log_to_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file)
            .map_err(|e| Error::Config {
                message: format!("cannot open log file {}: {e}", config.file.display()),
                key: Some("logging.file".to_string()),
            })?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    installed.map_err(|e| Error::Other(format!("failed to install log subscriber: {e}")))
}
