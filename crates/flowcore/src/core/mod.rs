pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limiter;
pub mod types;

pub use config::Settings;
pub use error::{ConfigError, DispatchError, GatewayError, HandlerResult, LlmError, RejectReason, StorageError};
pub use logging::init_logger;
pub use rate_limiter::RateLimiter;
pub use types::{ContentType, EventKind, InboundEvent, MediaRef, Profile, UserId};
