use std::time::Duration;

use strum::{AsRefStr, Display};
use thiserror::Error;

/// Persistence failures.
///
/// Every storage operation is a single SQL statement or an explicit transaction,
/// so an error here never leaves a half-written row behind.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    /// JSON columns (broadcast payloads, recipient snapshots, data bags)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The blocking database task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Outbound transport failures.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Send failed: {0}")]
    Send(String),

    /// The call did not finish within the configured send timeout
    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Download failed: {0}")]
    Download(String),
}

/// Failures talking to the language model.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM request failed with status {0}: {1}")]
    Status(reqwest::StatusCode, String),

    #[error("Malformed LLM response: {0}")]
    Malformed(String),

    #[error("LLM client is not configured (missing API key)")]
    NotConfigured,
}

/// Startup configuration failures. All of them are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("BOT_TOKEN is not set")]
    MissingToken,

    #[error("BOT_TOKEN has an invalid format")]
    InvalidToken,

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Why an event was stopped before reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    RateLimited,
    Blocked,
}

/// Error taxonomy of the dispatch path.
///
/// Everything except `Fatal` is caught at the dispatch boundary in
/// [`crate::engine::Engine`] and never takes the event loop down.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Rate-limited or blocked user. Silent, no retry.
    #[error("Event rejected: {0}")]
    Rejected(RejectReason),

    /// Bad input mid-flow. Carries the text to show the user before re-prompting.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Persistence or outbound send failure. State is left untouched so the
    /// user can retry the same step.
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    /// Missing required startup configuration.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl From<StorageError> for DispatchError {
    fn from(err: StorageError) -> Self {
        DispatchError::TransientIo(err.to_string())
    }
}

impl From<GatewayError> for DispatchError {
    fn from(err: GatewayError) -> Self {
        DispatchError::TransientIo(err.to_string())
    }
}

impl From<LlmError> for DispatchError {
    fn from(err: LlmError) -> Self {
        DispatchError::TransientIo(err.to_string())
    }
}

impl From<ConfigError> for DispatchError {
    fn from(err: ConfigError) -> Self {
        DispatchError::Fatal(err.to_string())
    }
}

/// Result type returned by every handler and pipeline stage
pub type HandlerResult<T = ()> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_becomes_transient() {
        let err: DispatchError = StorageError::NotFound("user 7".into()).into();
        assert!(matches!(err, DispatchError::TransientIo(msg) if msg.contains("user 7")));
    }

    #[test]
    fn test_timeout_becomes_transient() {
        let err: DispatchError = GatewayError::Timeout(Duration::from_secs(3)).into();
        assert!(matches!(err, DispatchError::TransientIo(_)));
    }

    #[test]
    fn test_config_error_is_fatal() {
        let err: DispatchError = ConfigError::MissingToken.into();
        assert!(matches!(err, DispatchError::Fatal(_)));
    }

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(RejectReason::RateLimited.to_string(), "rate_limited");
        assert_eq!(RejectReason::Blocked.as_ref(), "blocked");
    }
}
