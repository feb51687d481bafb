//! AI chat mode: persisted per-user history around an [`LlmClient`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::{self, Settings};
use crate::core::error::{LlmError, StorageError};
use crate::core::types::UserId;
use crate::llm::{ChatTurn, ImageInput, LlmClient};

/// Stored chat turns, one conversation per user.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn append(&self, user: UserId, turn: ChatTurn) -> Result<(), StorageError>;

    /// The newest `limit` turns, oldest first.
    async fn recent(&self, user: UserId, limit: usize) -> Result<Vec<ChatTurn>, StorageError>;

    async fn clear(&self, user: UserId) -> Result<(), StorageError>;
}

#[derive(Debug)]
pub enum AskOutcome {
    Answered(String),
    /// Only the user turn was kept; nothing was stored for the model.
    LlmFailed(LlmError),
}

pub struct Assistant {
    llm: Arc<dyn LlmClient>,
    history: Arc<dyn ChatHistoryStore>,
    system_prompt: String,
    history_limit: usize,
    max_input_length: usize,
}

impl Assistant {
    pub fn new(llm: Arc<dyn LlmClient>, history: Arc<dyn ChatHistoryStore>, settings: &Settings) -> Self {
        Self {
            llm,
            history,
            system_prompt: settings.system_prompt.clone(),
            history_limit: settings.chat_history_limit.max(1),
            max_input_length: settings.max_input_length,
        }
    }

    pub fn history(&self) -> &Arc<dyn ChatHistoryStore> {
        &self.history
    }

    /// Records the user's turn, asks the model with the bounded history and
    /// records its answer.
    ///
    /// # Arguments
    ///
    /// * `user` - whose conversation to continue
    /// * `text` - message text or media caption; truncated to the input limit
    /// * `image` - optional picture that goes with `text`
    ///
    /// # Returns
    ///
    /// The reply (an ellipsis if the model returned nothing), or the model
    /// failure. Storage failures are returned as `Err`.
    pub async fn ask(&self, user: UserId, text: &str, image: Option<ImageInput>) -> Result<AskOutcome, StorageError> {
        let input: String = text.chars().take(self.max_input_length).collect();
        self.history.append(user, ChatTurn::user(input)).await?;

        let window = self.history.recent(user, self.history_limit).await?;
        let reply = match self.llm.complete(&self.system_prompt, &window, image.as_ref()).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("LLM call failed for user {}: {}", user, e);
                return Ok(AskOutcome::LlmFailed(e));
            }
        };

        let reply = if reply.trim().is_empty() {
            config::assistant::EMPTY_REPLY.to_string()
        } else {
            reply
        };
        self.history.append(user, ChatTurn::assistant(reply.clone())).await?;
        Ok(AskOutcome::Answered(reply))
    }

    pub async fn reset(&self, user: UserId) -> Result<(), StorageError> {
        self.history.clear(user).await
    }
}
