//! Telegram transport: update adapter, outbound gateway and dispatcher schema.

pub mod adapter;
pub mod bot;
pub mod gateway;
pub mod schema;

pub use bot::{create_bot, setup_bot_commands, Command};
pub use gateway::TelegramGateway;
pub use schema::{schema, HandlerError};

pub type Bot = teloxide::Bot;
