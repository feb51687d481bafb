//! Item catalog: seeded categories and user-created items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::StorageError;
use crate::core::types::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub owner: UserId,
    pub category_id: i64,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub owner: UserId,
    pub category_id: i64,
    pub name: String,
    pub content: String,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn categories(&self) -> Result<Vec<Category>, StorageError>;

    async fn category(&self, id: i64) -> Result<Option<Category>, StorageError>;

    async fn create_item(&self, item: NewItem) -> Result<Item, StorageError>;

    /// Newest first.
    async fn items_by_owner(&self, owner: UserId) -> Result<Vec<Item>, StorageError>;
}
