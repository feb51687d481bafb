use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::GatewayError;
use crate::core::types::UserId;
use crate::gateway::{Gateway, OutboundMessage};

/// One recorded outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub user: UserId,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct Recorded {
    sent: Vec<Sent>,
    acks: Vec<String>,
    failing: HashSet<UserId>,
    hanging: HashSet<UserId>,
    files: HashMap<String, Vec<u8>>,
}

/// Gateway that records every call instead of talking to a platform.
#[derive(Default)]
pub struct RecordingGateway {
    inner: Mutex<Recorded>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `user` fails from now on.
    pub fn fail_for(&self, user: UserId) {
        self.with(|r| {
            r.failing.insert(user);
        });
    }

    /// Every send to `user` never completes.
    pub fn hang_for(&self, user: UserId) {
        self.with(|r| {
            r.hanging.insert(user);
        });
    }

    /// Makes `file_id` downloadable.
    pub fn put_file(&self, file_id: &str, bytes: Vec<u8>) {
        self.with(|r| {
            r.files.insert(file_id.to_string(), bytes);
        });
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.with(|r| r.sent.clone())
    }

    pub fn sent_to(&self, user: UserId) -> Vec<OutboundMessage> {
        self.with(|r| {
            r.sent
                .iter()
                .filter(|s| s.user == user)
                .map(|s| s.message.clone())
                .collect()
        })
    }

    /// Text of the latest message sent to `user`.
    pub fn last_text(&self, user: UserId) -> Option<String> {
        self.sent_to(user).pop().map(|m| m.text)
    }

    pub fn acks(&self) -> Vec<String> {
        self.with(|r| r.acks.clone())
    }

    pub fn clear(&self) {
        self.with(|r| {
            r.sent.clear();
            r.acks.clear();
        });
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send(&self, user: UserId, message: &OutboundMessage) -> Result<(), GatewayError> {
        let (failing, hanging) = self.with(|r| (r.failing.contains(&user), r.hanging.contains(&user)));
        if hanging {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if failing {
            return Err(GatewayError::Send(format!("recipient {} unreachable", user)));
        }
        self.with(|r| {
            r.sent.push(Sent {
                user,
                message: message.clone(),
            })
        });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> Result<(), GatewayError> {
        self.with(|r| r.acks.push(callback_id.to_string()));
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, GatewayError> {
        self.with(|r| r.files.get(file_id).cloned())
            .ok_or_else(|| GatewayError::Download(format!("unknown file {}", file_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::gateway::Outbox;

    #[tokio::test]
    async fn test_records_and_fails() {
        let gateway = Arc::new(RecordingGateway::new());
        gateway.fail_for(UserId(2));
        let outbox = Outbox::new(gateway.clone(), Duration::from_secs(1));

        outbox.send_text(UserId(1), "hi").await.unwrap();
        assert!(outbox.send_text(UserId(2), "hi").await.is_err());
        assert_eq!(gateway.sent().len(), 1);
        assert_eq!(gateway.last_text(UserId(1)).as_deref(), Some("hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_send_times_out() {
        let gateway = Arc::new(RecordingGateway::new());
        gateway.hang_for(UserId(1));
        let outbox = Outbox::new(gateway.clone(), Duration::from_secs(5));

        let err = outbox.send_text(UserId(1), "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
        assert!(gateway.sent().is_empty());
    }
}
