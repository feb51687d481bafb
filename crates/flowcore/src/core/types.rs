//! Transport-neutral event types shared by the pipeline, dispatcher and handlers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tokio::time::Instant;

/// Gateway-assigned user identity. Immutable and the sole join key of every table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display fields the gateway reports with every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

impl Profile {
    pub fn named(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            ..Self::default()
        }
    }

    /// "First Last", falling back to the bare first name.
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// Content categories a route can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain, non-command text
    Text,
    Photo,
    Document,
    Voice,
    Sticker,
    Other,
}

/// Reference to a media object held by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: ContentType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `/name args`; the `@botname` suffix is already stripped
    Command { name: String, args: String },
    Text(String),
    Callback { id: String, data: String },
    Media { media: MediaRef, caption: Option<String> },
}

impl EventKind {
    /// Classifies a raw text message as a command or plain text.
    ///
    /// # Example
    ///
    /// ```
    /// use flowcore::core::types::EventKind;
    ///
    /// let kind = EventKind::from_text("/start@flow_bot ref42");
    /// assert_eq!(
    ///     kind,
    ///     EventKind::Command { name: "start".into(), args: "ref42".into() }
    /// );
    /// ```
    pub fn from_text(text: &str) -> Self {
        let Some(rest) = text.strip_prefix('/') else {
            return EventKind::Text(text.to_string());
        };
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or_default();
        if name.is_empty() {
            return EventKind::Text(text.to_string());
        }
        EventKind::Command {
            name: name.to_lowercase(),
            args: args.to_string(),
        }
    }
}

/// One inbound message, callback action or media item, attributed to one user.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub profile: Profile,
    pub kind: EventKind,
    pub received_at: DateTime<Utc>,
    /// Monotonic arrival time; admission is judged against it, not against
    /// the time the event gets its turn.
    pub arrived_at: Instant,
}

impl InboundEvent {
    pub fn new(user_id: UserId, profile: Profile, kind: EventKind) -> Self {
        Self {
            user_id,
            profile,
            kind,
            received_at: Utc::now(),
            arrived_at: Instant::now(),
        }
    }

    /// Content type for routing; commands and callbacks have none.
    pub fn content_type(&self) -> Option<ContentType> {
        match &self.kind {
            EventKind::Text(_) => Some(ContentType::Text),
            EventKind::Media { media, .. } => Some(media.kind),
            EventKind::Command { .. } | EventKind::Callback { .. } => None,
        }
    }

    /// Message text, or the caption of a media item.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Text(text) => Some(text),
            EventKind::Media { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match &self.kind {
            EventKind::Media { media, .. } => Some(media),
            _ => None,
        }
    }

    pub fn command(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Command { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn callback_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Callback { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Callback { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Short label used in logs and the audit table.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Command { .. } => "command",
            EventKind::Text(_) => "text",
            EventKind::Callback { .. } => "callback",
            EventKind::Media { .. } => "media",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            EventKind::from_text("/menu"),
            EventKind::Command {
                name: "menu".into(),
                args: String::new()
            }
        );
        assert_eq!(
            EventKind::from_text("/Start@SomeBot  hello world "),
            EventKind::Command {
                name: "start".into(),
                args: "hello world".into()
            }
        );
    }

    #[test]
    fn test_plain_text_is_not_command() {
        assert_eq!(EventKind::from_text("hello /start"), EventKind::Text("hello /start".into()));
        assert_eq!(EventKind::from_text("/"), EventKind::Text("/".into()));
    }

    #[test]
    fn test_caption_is_text() {
        let event = InboundEvent::new(
            UserId(1),
            Profile::named("Ann"),
            EventKind::Media {
                media: MediaRef {
                    file_id: "f1".into(),
                    kind: ContentType::Photo,
                },
                caption: Some("hi".into()),
            },
        );
        assert_eq!(event.text(), Some("hi"));
        assert_eq!(event.content_type(), Some(ContentType::Photo));
        assert_eq!(event.kind_name(), "media");
    }

    #[test]
    fn test_full_name() {
        let mut profile = Profile::named("Ann");
        assert_eq!(profile.full_name(), "Ann");
        profile.last_name = Some("Lee".into());
        assert_eq!(profile.full_name(), "Ann Lee");
    }
}
