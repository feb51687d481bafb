//! Logger initialization (console + file).
//!
//! The crate logs through the `log` facade; `LogTracer` forwards those records
//! into a `tracing` subscriber with an env filter and two fmt layers.

use std::fs::OpenOptions;
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to open log file: {0}")]
    File(#[from] std::io::Error),

    #[error("Failed to install log bridge: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("Failed to set global subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize logger for both console and file output
///
/// Level comes from `RUST_LOG`, defaulting to `info`. The file is opened in
/// append mode so restarts keep history.
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(LoggingError)` - file could not be opened, or a logger is already installed
pub fn init_logger(log_file_path: &str) -> Result<(), LoggingError> {
    let log_file = OpenOptions::new().create(true).append(true).open(log_file_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(log_file)));

    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;

    log::info!("Logger initialized, writing to {}", log_file_path);
    Ok(())
}
