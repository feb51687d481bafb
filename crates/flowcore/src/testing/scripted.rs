use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::error::LlmError;
use crate::llm::{ChatTurn, ImageInput, LlmClient};

/// What one `complete` call received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCall {
    pub history: Vec<ChatTurn>,
    pub with_image: bool,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<String>,
    fallback: String,
    failing: bool,
    calls: Vec<LlmCall>,
}

/// Language model double returning canned replies in order.
pub struct ScriptedLlm {
    inner: Mutex<Script>,
}

impl ScriptedLlm {
    /// Replies with `reply` to every call.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Script {
                fallback: reply.into(),
                ..Script::default()
            }),
        }
    }

    /// Replies with `replies` in order, then repeats the last one.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies: VecDeque<String> = replies.into_iter().map(Into::into).collect();
        let fallback = replies.back().cloned().unwrap_or_default();
        Self {
            inner: Mutex::new(Script {
                replies,
                fallback,
                ..Script::default()
            }),
        }
    }

    /// Every call fails with a status error.
    pub fn failing() -> Self {
        Self {
            inner: Mutex::new(Script {
                failing: true,
                ..Script::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<LlmCall> {
        self.with(|s| s.calls.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        history: &[ChatTurn],
        image: Option<&ImageInput>,
    ) -> Result<String, LlmError> {
        self.with(|s| {
            s.calls.push(LlmCall {
                history: history.to_vec(),
                with_image: image.is_some(),
            });
            if s.failing {
                return Err(LlmError::Status(
                    reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    "scripted failure".to_string(),
                ));
            }
            Ok(s.replies.pop_front().unwrap_or_else(|| s.fallback.clone()))
        })
    }
}
