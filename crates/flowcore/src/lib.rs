//! Messaging-platform-agnostic core of Flowbot.
//!
//! Inbound events go through a fixed middleware pipeline (rate limit,
//! identity with block check, conversation state) and are then routed to
//! exactly one handler by the [`dispatch::Dispatcher`]. Multi-turn input is
//! modelled as [`flow::Flow`]s; timed fan-out messages go through the
//! [`broadcast::BroadcastScheduler`].

pub mod assistant;
pub mod audit;
pub mod broadcast;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod flow;
pub mod gateway;
pub mod i18n;
pub mod identity;
pub mod items;
pub mod llm;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod testing;

pub use engine::{Engine, EngineParts, Processed};
