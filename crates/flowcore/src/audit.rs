//! Structured per-event audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::error::StorageError;
use crate::core::types::{EventKind, InboundEvent, UserId};
use crate::state::StateTag;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub user_id: UserId,
    pub kind: &'static str,
    /// Conversation state the event arrived in
    pub state: Option<String>,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Summary of an inbound event. Message bodies are not kept, only their size.
    pub fn from_inbound(event: &InboundEvent, state: Option<&StateTag>) -> Self {
        let payload = match &event.kind {
            EventKind::Command { name, args } => serde_json::json!({ "command": name, "args_len": args.len() }),
            EventKind::Text(text) => serde_json::json!({ "content": "text", "text_len": text.chars().count() }),
            EventKind::Callback { data, .. } => serde_json::json!({ "data": data }),
            EventKind::Media { media, caption } => serde_json::json!({
                "content": media.kind.as_ref(),
                "has_caption": caption.is_some(),
            }),
        };
        Self {
            user_id: event.user_id,
            kind: event.kind_name(),
            state: state.map(|tag| tag.as_str().to_string()),
            payload,
            at: event.received_at,
        }
    }

    /// Logs the event as one JSON line on the `audit` target.
    pub fn log(&self) {
        match serde_json::to_string(self) {
            Ok(line) => log::info!(target: "audit", "{}", line),
            Err(e) => log::warn!("Failed to serialize audit event: {}", e),
        }
    }
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Profile;

    #[test]
    fn test_text_body_is_not_logged() {
        let event = InboundEvent::new(UserId(5), Profile::named("Ann"), EventKind::Text("secret plans".into()));
        let audit = AuditEvent::from_inbound(&event, None);
        let line = serde_json::to_string(&audit).unwrap();

        assert_eq!(audit.kind, "text");
        assert!(line.contains("\"text_len\":12"));
        assert!(!line.contains("secret"));
    }

    #[test]
    fn test_state_tag_is_kept() {
        let event = InboundEvent::new(
            UserId(5),
            Profile::named("Ann"),
            EventKind::Callback {
                id: "1".into(),
                data: "category_2".into(),
            },
        );
        let tag = StateTag::from_static("item.category");
        let audit = AuditEvent::from_inbound(&event, Some(&tag));

        assert_eq!(audit.state.as_deref(), Some("item.category"));
        assert_eq!(audit.payload["data"], "category_2");
    }
}
