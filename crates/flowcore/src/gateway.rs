//! Outbound transport boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::GatewayError;
use crate::core::types::UserId;

/// Inline button carrying a callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Content of one outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Body, or the caption when `photo` is set
    pub text: String,
    /// Gateway file id of a photo to send
    pub photo: Option<String>,
    pub keyboard: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_photo(mut self, file_id: impl Into<String>) -> Self {
        self.photo = Some(file_id.into());
        self
    }

    pub fn with_row(mut self, row: Vec<Button>) -> Self {
        self.keyboard.push(row);
        self
    }

    pub fn with_keyboard(mut self, rows: Vec<Vec<Button>>) -> Self {
        self.keyboard.extend(rows);
        self
    }
}

/// What the core needs from the messaging gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send(&self, user: UserId, message: &OutboundMessage) -> Result<(), GatewayError>;

    /// Acknowledges a callback action so the client stops its spinner.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), GatewayError>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, GatewayError>;
}

/// Time-bounded handle to the gateway.
///
/// Every call is wrapped in a timeout so a dead gateway turns into a
/// [`GatewayError::Timeout`] instead of a stuck per-user worker.
#[derive(Clone)]
pub struct Outbox {
    gateway: Arc<dyn Gateway>,
    timeout: Duration,
}

impl Outbox {
    pub fn new(gateway: Arc<dyn Gateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub async fn send(&self, user: UserId, message: &OutboundMessage) -> Result<(), GatewayError> {
        tokio::time::timeout(self.timeout, self.gateway.send(user, message))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }

    pub async fn send_text(&self, user: UserId, text: impl Into<String>) -> Result<(), GatewayError> {
        self.send(user, &OutboundMessage::text(text)).await
    }

    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), GatewayError> {
        tokio::time::timeout(self.timeout, self.gateway.answer_callback(callback_id, text))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }

    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, GatewayError> {
        tokio::time::timeout(self.timeout, self.gateway.download(file_id))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }
}
