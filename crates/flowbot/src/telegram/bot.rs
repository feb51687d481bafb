//! Bot instance creation and the command list shown in the Telegram UI.

use reqwest::ClientBuilder;
use teloxide::types::BotCommand;
use teloxide::utils::command::BotCommands;

use flowcore::core::config::Settings;

use super::Bot;

/// Commands advertised to users.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "show the bot description")]
    Start,
    #[command(description = "open the main menu")]
    Menu,
    #[command(description = "leave ChatGPT mode")]
    Stop,
    #[command(description = "admin menu (admins only)")]
    Admin,
}

/// Creates a Bot for the configured token.
///
/// Requests are bounded by the send timeout plus a margin so the client never
/// outlives the gateway's own deadline by much.
pub fn create_bot(settings: &Settings) -> anyhow::Result<Bot> {
    let client = ClientBuilder::new()
        .timeout(settings.send_timeout + std::time::Duration::from_secs(5))
        .build()?;
    Ok(Bot::with_client(settings.bot_token(), client))
}

/// Publishes the command list in the Telegram UI.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::prelude::Requester;

    let commands: Vec<BotCommand> = Command::bot_commands();
    bot.set_my_commands(commands).await?;
    Ok(())
}
