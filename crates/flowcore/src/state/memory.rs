use async_trait::async_trait;
use dashmap::DashMap;

use super::{ConversationState, DataBag, StateStore, StateTag};
use crate::core::error::StorageError;
use crate::core::types::UserId;

/// In-process state store. In-flight flows are lost on restart.
#[derive(Default)]
pub struct MemoryStateStore {
    states: DashMap<UserId, ConversationState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users currently holding a non-idle state.
    pub fn active_count(&self) -> usize {
        self.states.iter().filter(|entry| !entry.is_idle()).count()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, user: UserId) -> Result<ConversationState, StorageError> {
        Ok(self.states.get(&user).map(|s| s.value().clone()).unwrap_or_default())
    }

    async fn set(&self, user: UserId, tag: StateTag) -> Result<(), StorageError> {
        self.states.entry(user).or_default().tag = Some(tag);
        Ok(())
    }

    async fn merge_data(&self, user: UserId, partial: DataBag) -> Result<(), StorageError> {
        self.states.entry(user).or_default().data.extend(partial);
        Ok(())
    }

    async fn clear(&self, user: UserId) -> Result<(), StorageError> {
        self.states.remove(&user);
        Ok(())
    }

    async fn transition(&self, user: UserId, tag: StateTag, partial: DataBag) -> Result<(), StorageError> {
        let mut state = self.states.entry(user).or_default();
        state.data.extend(partial);
        state.tag = Some(tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag;
    use pretty_assertions::assert_eq;

    const A: StateTag = StateTag::from_static("flow.a");
    const B: StateTag = StateTag::from_static("flow.b");

    #[tokio::test]
    async fn test_unknown_user_is_idle() {
        let store = MemoryStateStore::new();
        let state = store.get(UserId(1)).await.unwrap();
        assert!(state.is_idle());
        assert!(state.data.is_empty());
    }

    #[tokio::test]
    async fn test_set_twice_keeps_latest_tag_and_merged_data() {
        let store = MemoryStateStore::new();
        let user = UserId(1);

        store.transition(user, A, bag! { "x" => 1i64 }).await.unwrap();
        store.transition(user, B, bag! { "y" => 2i64 }).await.unwrap();

        let state = store.get(user).await.unwrap();
        assert_eq!(state.tag, Some(B));
        assert_eq!(state.data, bag! { "x" => 1i64, "y" => 2i64 });
    }

    #[tokio::test]
    async fn test_set_preserves_bag() {
        let store = MemoryStateStore::new();
        let user = UserId(2);

        store.merge_data(user, bag! { "k" => "v" }).await.unwrap();
        store.set(user, A).await.unwrap();
        store.set(user, B).await.unwrap();

        let state = store.get(user).await.unwrap();
        assert_eq!(state.tag, Some(B));
        assert_eq!(state.text("k"), Some("v"));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStateStore::new();
        let user = UserId(3);

        store.transition(user, A, bag! { "k" => "v" }).await.unwrap();
        assert_eq!(store.active_count(), 1);
        store.clear(user).await.unwrap();

        assert_eq!(store.get(user).await.unwrap(), ConversationState::default());
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = MemoryStateStore::new();
        store.set(UserId(1), A).await.unwrap();
        store.set(UserId(2), B).await.unwrap();
        store.clear(UserId(1)).await.unwrap();

        assert!(store.get(UserId(1)).await.unwrap().is_idle());
        assert_eq!(store.get(UserId(2)).await.unwrap().tag, Some(B));
    }
}
