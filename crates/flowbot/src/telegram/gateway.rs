//! [`Gateway`] over the Telegram Bot API.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};

use flowcore::core::error::GatewayError;
use flowcore::core::types::UserId;
use flowcore::gateway::{Button, Gateway, OutboundMessage};

use super::Bot;

pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn keyboard(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.data.clone()))
            .collect::<Vec<_>>()
    }))
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send(&self, user: UserId, message: &OutboundMessage) -> Result<(), GatewayError> {
        let chat = ChatId(user.0);
        let result = match &message.photo {
            Some(photo) => {
                let mut req = self.bot.send_photo(chat, InputFile::file_id(FileId(photo.clone())));
                if !message.text.is_empty() {
                    req = req.caption(message.text.clone());
                }
                if !message.keyboard.is_empty() {
                    req = req.reply_markup(keyboard(&message.keyboard));
                }
                req.await.map(|_| ())
            }
            None => {
                let mut req = self.bot.send_message(chat, message.text.clone());
                if !message.keyboard.is_empty() {
                    req = req.reply_markup(keyboard(&message.keyboard));
                }
                req.await.map(|_| ())
            }
        };
        result.map_err(|e| GatewayError::Send(e.to_string()))
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), GatewayError> {
        let mut req = self.bot.answer_callback_query(CallbackQueryId(callback_id.to_string()));
        if let Some(text) = text {
            req = req.text(text);
        }
        req.await.map(|_| ()).map_err(|e| GatewayError::Send(e.to_string()))
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, GatewayError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| GatewayError::Download(format!("failed to get file info: {}", e)))?;

        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| GatewayError::Download(format!("failed to download file: {}", e)))?;
        log::debug!("Downloaded file {} ({} bytes)", file_id, buf.len());
        Ok(buf)
    }
}
