//! Durable user identity: upsert on every event, role and block flag.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use unic_langid::LanguageIdentifier;

use crate::core::error::StorageError;
use crate::core::types::{Profile, UserId};
use crate::i18n;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    /// Chosen interface language; seeded from the gateway locale on first contact
    pub lang: Option<String>,
    pub role: Role,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Language to render replies in.
    pub fn language(&self) -> LanguageIdentifier {
        i18n::lang_from_code(self.lang.as_deref().unwrap_or_default())
    }

    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{}", username),
            None => match &self.last_name {
                Some(last) => format!("{} {}", self.first_name, last),
                None => self.first_name.clone(),
            },
        }
    }
}

/// Read/write access to user identities.
///
/// Every method is a single atomic statement in the backing store.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Creates the user on first contact, otherwise refreshes the display
    /// fields and last-seen time. Role, block flag and language are kept.
    async fn upsert(&self, id: UserId, profile: &Profile) -> Result<User, StorageError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, StorageError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StorageError>;

    /// Sets the role, creating a bare record if the user was never seen.
    async fn set_role(&self, id: UserId, role: Role) -> Result<(), StorageError>;

    /// Returns `false` if the user is unknown.
    async fn set_blocked(&self, id: UserId, blocked: bool) -> Result<bool, StorageError>;

    async fn set_language(&self, id: UserId, lang: &str) -> Result<(), StorageError>;

    /// Every non-blocked user, for broadcast recipient snapshots.
    async fn list_active_ids(&self) -> Result<Vec<UserId>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn user(username: Option<&str>) -> User {
        User {
            id: UserId(1),
            username: username.map(str::to_string),
            first_name: "Ann".into(),
            last_name: Some("Lee".into()),
            lang: Some("ru".into()),
            role: Role::User,
            is_blocked: false,
            created_at: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn test_role_strings() {
        assert_eq!(Role::Admin.as_ref(), "admin");
        assert_eq!(Role::from_str("user").ok(), Some(Role::User));
        assert!(Role::from_str("root").is_err());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(user(Some("ann")).display_name(), "@ann");
        assert_eq!(user(None).display_name(), "Ann Lee");
    }

    #[test]
    fn test_language() {
        assert_eq!(user(None).language().to_string(), "ru");
    }
}
