//! Per-user conversation state: one active tag plus an accumulated data bag.

mod memory;

pub use memory::MemoryStateStore;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::StorageError;
use crate::core::types::UserId;

/// Scalar value stored in a data bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

/// Key/value data accumulated across the steps of a flow.
pub type DataBag = BTreeMap<String, Scalar>;

/// Builds a [`DataBag`] from `key => value` pairs.
#[macro_export]
macro_rules! bag {
    () => { $crate::state::DataBag::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut bag = $crate::state::DataBag::new();
        $( bag.insert(($key).to_string(), $crate::state::Scalar::from($value)); )+
        bag
    }};
}

/// Name of a state a handler or flow waits in, e.g. `item.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTag(Cow<'static, str>);

impl StateTag {
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's conversation state. `tag == None` means idle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub tag: Option<StateTag>,
    pub data: DataBag,
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        self.tag.is_none()
    }

    pub fn is_in(&self, tag: &StateTag) -> bool {
        self.tag.as_ref() == Some(tag)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Scalar::as_str)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(Scalar::as_i64)
    }
}

/// Keyed conversation state, injected into every handler call.
///
/// Operations for one user are observed in the order issued; the engine
/// serializes a user's events, so implementations only need per-key atomicity.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current state; idle with an empty bag if nothing is stored.
    async fn get(&self, user: UserId) -> Result<ConversationState, StorageError>;

    /// Overwrites the tag and keeps the data bag.
    async fn set(&self, user: UserId, tag: StateTag) -> Result<(), StorageError>;

    /// Merges `partial` into the bag; later keys overwrite earlier ones.
    async fn merge_data(&self, user: UserId, partial: DataBag) -> Result<(), StorageError>;

    /// Back to idle with an empty bag.
    async fn clear(&self, user: UserId) -> Result<(), StorageError>;

    /// Merges `partial` and moves to `tag`.
    async fn transition(&self, user: UserId, tag: StateTag, partial: DataBag) -> Result<(), StorageError> {
        self.merge_data(user, partial).await?;
        self.set(user, tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bag_macro() {
        let bag = bag! { "name" => "lamp", "category_id" => 3i64 };
        assert_eq!(bag.get("name"), Some(&Scalar::Text("lamp".into())));
        assert_eq!(bag.get("category_id").and_then(Scalar::as_i64), Some(3));
    }

    #[test]
    fn test_scalar_json_keeps_kinds() {
        let bag = bag! { "a" => 1i64, "b" => 1.5f64, "c" => true, "d" => "x" };
        let json = serde_json::to_string(&bag).unwrap();
        let back: DataBag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bag);
    }

    #[test]
    fn test_state_accessors() {
        let state = ConversationState {
            tag: Some(StateTag::from_static("item.name")),
            data: bag! { "category_id" => 2i64 },
        };
        assert!(!state.is_idle());
        assert!(state.is_in(&StateTag::new("item.name")));
        assert_eq!(state.int("category_id"), Some(2));
        assert_eq!(state.text("category_id"), None);
    }
}
