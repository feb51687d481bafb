//! Telegram front-end: teloxide adapter, the concrete handler set and the CLI.

pub mod cli;
pub mod handlers;
pub mod telegram;
