//! Telegram update → [`InboundEvent`].

use teloxide::types::{CallbackQuery, Message, User};

use flowcore::core::types::{ContentType, EventKind, InboundEvent, MediaRef, Profile, UserId};

pub fn profile_from(user: &User) -> Profile {
    Profile {
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        language_code: user.language_code.clone(),
    }
}

fn user_id(user: &User) -> Option<UserId> {
    i64::try_from(user.id.0).ok().map(UserId)
}

/// Converts a private-chat message. Group messages and anonymous senders yield `None`.
pub fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    if !msg.chat.is_private() {
        return None;
    }
    let user = msg.from.as_ref()?;
    let id = user_id(user)?;
    Some(InboundEvent::new(id, profile_from(user), message_kind(msg)))
}

/// Converts a callback query. A query without data still becomes an event so it gets acknowledged.
pub fn event_from_callback(q: &CallbackQuery) -> Option<InboundEvent> {
    let id = user_id(&q.from)?;
    let kind = EventKind::Callback {
        id: q.id.0.clone(),
        data: q.data.clone().unwrap_or_default(),
    };
    Some(InboundEvent::new(id, profile_from(&q.from), kind))
}

fn message_kind(msg: &Message) -> EventKind {
    if let Some(text) = msg.text() {
        return EventKind::from_text(text);
    }

    let media = if let Some(photos) = msg.photo() {
        // the last size is the largest
        photos.last().map(|p| (p.file.id.0.clone(), ContentType::Photo))
    } else if let Some(doc) = msg.document() {
        Some((doc.file.id.0.clone(), ContentType::Document))
    } else if let Some(voice) = msg.voice() {
        Some((voice.file.id.0.clone(), ContentType::Voice))
    } else {
        msg.sticker().map(|s| (s.file.id.0.clone(), ContentType::Sticker))
    };
    let (file_id, kind) = media.unwrap_or((String::new(), ContentType::Other));

    EventKind::Media {
        media: MediaRef { file_id, kind },
        caption: msg.caption().map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn from() -> serde_json::Value {
        json!({
            "id": 42,
            "is_bot": false,
            "first_name": "Ann",
            "username": "ann",
            "language_code": "ru",
        })
    }

    fn private_message(extra: serde_json::Value) -> Message {
        let mut value = json!({
            "message_id": 1,
            "date": 1700000000i64,
            "chat": { "id": 42, "type": "private", "first_name": "Ann" },
            "from": from(),
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(value).expect("failed to deserialize mock message")
    }

    #[test]
    fn test_text_and_command() {
        let event = event_from_message(&private_message(json!({ "text": "/start@flow_bot" }))).unwrap();
        assert_eq!(event.user_id, UserId(42));
        assert_eq!(event.command(), Some("start"));
        assert_eq!(event.profile.language_code.as_deref(), Some("ru"));

        let event = event_from_message(&private_message(json!({ "text": "hello" }))).unwrap();
        assert_eq!(event.kind, EventKind::Text("hello".into()));
    }

    #[test]
    fn test_photo_uses_largest_size_and_caption() {
        let msg = private_message(json!({
            "photo": [
                { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90 },
                { "file_id": "large", "file_unique_id": "l", "width": 1280, "height": 1280 },
            ],
            "caption": "hi",
        }));
        let event = event_from_message(&msg).unwrap();

        assert_eq!(event.content_type(), Some(ContentType::Photo));
        assert_eq!(event.media().map(|m| m.file_id.as_str()), Some("large"));
        assert_eq!(event.text(), Some("hi"));
    }

    #[test]
    fn test_group_messages_are_ignored() {
        let value = json!({
            "message_id": 1,
            "date": 1700000000i64,
            "chat": { "id": -100123i64, "type": "supergroup", "title": "Group" },
            "from": from(),
            "text": "hello",
        });
        let msg: Message = serde_json::from_value(value).expect("failed to deserialize mock message");
        assert!(event_from_message(&msg).is_none());
    }

    #[test]
    fn test_callback() {
        let value = json!({
            "id": "4382",
            "from": from(),
            "chat_instance": "-1",
            "data": "category_2",
        });
        let q: CallbackQuery = serde_json::from_value(value).expect("failed to deserialize mock callback");
        let event = event_from_callback(&q).unwrap();

        assert_eq!(event.callback_id(), Some("4382"));
        assert_eq!(event.callback_data(), Some("category_2"));
    }
}
