//! Runtime settings and compile-time tuning constants.
//!
//! Settings are layered with figment: compiled defaults, then an optional
//! `flowbot.toml`, then environment variables with the same (upper-cased) names.

use std::env;
use std::time::Duration;

use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Path of the optional TOML settings file.
/// Read from FLOWBOT_CONFIG environment variable
/// Default: flowbot.toml
pub static CONFIG_FILE: Lazy<String> =
    Lazy::new(|| env::var("FLOWBOT_CONFIG").unwrap_or_else(|_| "flowbot.toml".to_string()));

static BOT_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[0-9]{6,}:[A-Za-z0-9_-]{30,}$").unwrap()
});

/// Environment variables picked up by the env layer.
const ENV_KEYS: &[&str] = &[
    "BOT_TOKEN",
    "DATABASE_PATH",
    "LOG_FILE_PATH",
    "ANTIFLOOD_ENABLED",
    "ANTIFLOOD_WINDOW_SECS",
    "ANTIFLOOD_LIMIT",
    "THROTTLE_NOTICE_WINDOW_SECS",
    "SEND_TIMEOUT_SECS",
    "SCHEDULER_TICK_MS",
    "TIMEZONE_OFFSET_MINUTES",
    "SUPERUSER_ID",
    "SUPERUSER_USERNAME",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "LLM_MODEL",
    "LLM_TEMPERATURE",
    "CHAT_HISTORY_LIMIT",
    "MAX_INPUT_LENGTH",
    "SYSTEM_PROMPT",
    "DEFAULT_LANGUAGE",
];

/// Settings exactly as they come out of the provider stack, secrets still plain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSettings {
    pub bot_token: Option<String>,
    pub database_path: String,
    pub log_file_path: String,
    pub antiflood_enabled: bool,
    pub antiflood_window_secs: u64,
    pub antiflood_limit: usize,
    pub throttle_notice_window_secs: u64,
    pub send_timeout_secs: u64,
    pub scheduler_tick_ms: u64,
    pub timezone_offset_minutes: i32,
    pub superuser_id: Option<i64>,
    pub superuser_username: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub chat_history_limit: usize,
    pub max_input_length: usize,
    pub system_prompt: String,
    pub default_language: String,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            database_path: "flowbot.sqlite".to_string(),
            log_file_path: "flowbot.log".to_string(),
            antiflood_enabled: true,
            antiflood_window_secs: rate_limit::WINDOW_SECS,
            antiflood_limit: rate_limit::LIMIT,
            throttle_notice_window_secs: rate_limit::NOTICE_WINDOW_SECS,
            send_timeout_secs: network::SEND_TIMEOUT_SECS,
            scheduler_tick_ms: scheduler::TICK_MS,
            timezone_offset_minutes: 0,
            superuser_id: None,
            superuser_username: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.5,
            chat_history_limit: assistant::HISTORY_LIMIT,
            max_input_length: assistant::MAX_INPUT_LENGTH,
            system_prompt: "You are a helpful assistant. Answer concisely.".to_string(),
            default_language: "en".to_string(),
        }
    }
}

/// Validated application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: SecretString,
    pub database_path: String,
    pub log_file_path: String,
    pub antiflood_enabled: bool,
    pub antiflood_window: Duration,
    pub antiflood_limit: usize,
    pub throttle_notice_window: Duration,
    pub send_timeout: Duration,
    pub scheduler_tick: Duration,
    pub timezone: FixedOffset,
    pub superuser_id: Option<i64>,
    pub superuser_username: Option<String>,
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub chat_history_limit: usize,
    pub max_input_length: usize,
    pub system_prompt: String,
    pub default_language: String,
}

impl Settings {
    /// Loads settings from the default provider stack.
    ///
    /// # Returns
    /// * `Ok(Settings)` - all required values present and valid
    /// * `Err(ConfigError)` - fatal misconfiguration; the process must not start
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(figment(&CONFIG_FILE))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let raw: RawSettings = figment.extract()?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let token = raw.bot_token.filter(|t| !t.trim().is_empty()).ok_or(ConfigError::MissingToken)?;
        validate_bot_token(&token)?;

        let timezone = FixedOffset::east_opt(raw.timezone_offset_minutes * 60).ok_or_else(|| ConfigError::Invalid {
            key: "timezone_offset_minutes",
            reason: format!("{} is out of range", raw.timezone_offset_minutes),
        })?;
        let default_language = crate::i18n::is_language_supported(&raw.default_language).ok_or_else(|| {
            ConfigError::Invalid {
                key: "default_language",
                reason: format!("{} is not a supported language", raw.default_language),
            }
        })?;
        if raw.scheduler_tick_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler_tick_ms",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            bot_token: SecretString::from(token),
            database_path: raw.database_path,
            log_file_path: raw.log_file_path,
            antiflood_enabled: raw.antiflood_enabled,
            antiflood_window: Duration::from_secs(raw.antiflood_window_secs),
            antiflood_limit: raw.antiflood_limit.max(1),
            throttle_notice_window: Duration::from_secs(raw.throttle_notice_window_secs),
            send_timeout: Duration::from_secs(raw.send_timeout_secs.max(1)),
            scheduler_tick: Duration::from_millis(raw.scheduler_tick_ms),
            timezone,
            superuser_id: raw.superuser_id,
            superuser_username: raw.superuser_username.map(|u| u.trim_start_matches('@').to_string()),
            openai_api_key: raw.openai_api_key.filter(|k| !k.is_empty()).map(SecretString::from),
            openai_base_url: raw.openai_base_url,
            llm_model: raw.llm_model,
            llm_temperature: raw.llm_temperature,
            chat_history_limit: raw.chat_history_limit,
            max_input_length: raw.max_input_length,
            system_prompt: raw.system_prompt,
            default_language: default_language.to_string(),
        })
    }

    /// Non-secret settings as key/value pairs, for the admin "about" screen.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("database_path", self.database_path.clone()),
            ("antiflood", format!("{} per {:?}", self.antiflood_limit, self.antiflood_window)),
            ("send_timeout", format!("{:?}", self.send_timeout)),
            ("scheduler_tick", format!("{:?}", self.scheduler_tick)),
            ("timezone", self.timezone.to_string()),
            ("llm_model", self.llm_model.clone()),
            ("llm_temperature", self.llm_temperature.to_string()),
            ("chat_history_limit", self.chat_history_limit.to_string()),
            ("default_language", self.default_language.clone()),
            ("llm_configured", self.openai_api_key.is_some().to_string()),
        ]
    }

    pub fn bot_token(&self) -> &str {
        self.bot_token.expose_secret()
    }
}

/// Provider stack: defaults, then `path` if it exists, then the environment.
pub fn figment(path: &str) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(RawSettings::default()))
        .merge(Toml::file(path))
        .merge(Env::raw().only(ENV_KEYS))
}

/// Checks the `<digits>:<secret>` shape of a gateway token.
pub fn validate_bot_token(token: &str) -> Result<(), ConfigError> {
    if BOT_TOKEN_RE.is_match(token) {
        Ok(())
    } else {
        Err(ConfigError::InvalidToken)
    }
}

/// Rate limiting configuration
pub mod rate_limit {
    use super::Duration;

    /// Default admission window (in seconds)
    pub const WINDOW_SECS: u64 = 1;

    /// Admitted events per window
    pub const LIMIT: usize = 1;

    /// At most one throttle notice per user per this many seconds
    pub const NOTICE_WINDOW_SECS: u64 = 10;

    /// How often idle windows are dropped
    pub const CLEANUP_INTERVAL_SECS: u64 = 300;

    pub fn cleanup_interval() -> Duration {
        Duration::from_secs(CLEANUP_INTERVAL_SECS)
    }
}

/// Broadcast scheduler configuration
pub mod scheduler {
    /// Firing loop period (in milliseconds)
    pub const TICK_MS: u64 = 1000;

    /// Deliveries of one job running at the same time
    pub const MAX_CONCURRENT_DELIVERIES: usize = 16;

    /// Accepted broadcast time format, interpreted in the configured timezone
    pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Upper bound for a single outbound gateway call
    pub const SEND_TIMEOUT_SECS: u64 = 15;

    /// LLM completion request timeout
    pub const LLM_TIMEOUT_SECS: u64 = 120;

    pub fn llm_timeout() -> Duration {
        Duration::from_secs(LLM_TIMEOUT_SECS)
    }
}

/// AI chat mode configuration
pub mod assistant {
    /// Most recent turns passed to the model
    pub const HISTORY_LIMIT: usize = 6;

    /// User input is truncated to this many characters
    pub const MAX_INPUT_LENGTH: usize = 4000;

    /// Shown when the model returns nothing
    pub const EMPTY_REPLY: &str = "…";
}

/// Item catalog limits
pub mod items {
    pub const MAX_NAME_LENGTH: usize = 64;
}
