use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::db::{self, DbPool};
use super::migrations;
use crate::assistant::ChatHistoryStore;
use crate::audit::{AuditEvent, EventLog};
use crate::broadcast::{BroadcastJob, JobStore};
use crate::core::error::StorageError;
use crate::core::types::{Profile, UserId};
use crate::i18n;
use crate::identity::{IdentityStore, Role, User};
use crate::items::{Category, Item, ItemStore, NewItem};
use crate::llm::{ChatRole, ChatTurn};
use crate::state::{ConversationState, DataBag, StateStore, StateTag};

const USER_COLUMNS: &str = "user_id, username, first_name, last_name, lang, role, is_blocked, created_at, last_seen";

/// One SQLite database behind every store trait.
///
/// Calls run on the blocking thread pool with a pooled connection.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: Arc<DbPool>,
}

impl SqliteStorage {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let pool = db::create_pool(path)?;
        let mut conn = db::get_connection(&pool)?;
        migrations::run_migrations(&mut conn)?;
        drop(conn);
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut conn = db::get_connection(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(5)?;
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        lang: row.get(4)?,
        role: Role::from_str(&role).unwrap_or_default(),
        is_blocked: row.get::<_, i64>(6)? != 0,
        created_at: parse_ts(7, row.get(7)?)?,
        last_seen: parse_ts(8, row.get(8)?)?,
    })
}

fn read_state(conn: &Connection, user: UserId) -> Result<ConversationState, StorageError> {
    let row: Option<(Option<String>, String)> = conn
        .query_row(
            "SELECT tag, data FROM conversation_states WHERE user_id = ?1",
            params![user.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((tag, data)) = row else {
        return Ok(ConversationState::default());
    };
    Ok(ConversationState {
        tag: tag.map(StateTag::new),
        data: serde_json::from_str(&data)?,
    })
}

fn write_state(conn: &Connection, user: UserId, state: &ConversationState) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO conversation_states (user_id, tag, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET tag = excluded.tag, data = excluded.data, updated_at = excluded.updated_at",
        params![
            user.0,
            state.tag.as_ref().map(StateTag::as_str),
            serde_json::to_string(&state.data)?,
            now_text()
        ],
    )?;
    Ok(())
}

#[async_trait]
impl IdentityStore for SqliteStorage {
    async fn upsert(&self, id: UserId, profile: &Profile) -> Result<User, StorageError> {
        let profile = profile.clone();
        self.run(move |conn| {
            let lang = profile.language_code.as_deref().and_then(i18n::is_language_supported);
            let sql = format!(
                "INSERT INTO users (user_id, username, first_name, last_name, lang, role, is_blocked, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'user', 0, ?6, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                     username = excluded.username,
                     first_name = excluded.first_name,
                     last_name = excluded.last_name,
                     last_seen = excluded.last_seen
                 RETURNING {}",
                USER_COLUMNS
            );
            let user = conn.query_row(
                &sql,
                params![
                    id.0,
                    profile.username,
                    profile.first_name,
                    profile.last_name,
                    lang,
                    now_text()
                ],
                user_from_row,
            )?;
            Ok(user)
        })
        .await
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StorageError> {
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, params![id.0], user_from_row).optional()?)
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let username = username.trim_start_matches('@').to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE username = ?1 COLLATE NOCASE LIMIT 1",
                USER_COLUMNS
            );
            Ok(conn.query_row(&sql, params![username], user_from_row).optional()?)
        })
        .await
    }

    async fn set_role(&self, id: UserId, role: Role) -> Result<(), StorageError> {
        self.run(move |conn| {
            let now = now_text();
            conn.execute(
                "INSERT INTO users (user_id, first_name, role, is_blocked, created_at, last_seen)
                 VALUES (?1, '', ?2, 0, ?3, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET role = excluded.role",
                params![id.0, role.as_ref(), now],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_blocked(&self, id: UserId, blocked: bool) -> Result<bool, StorageError> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET is_blocked = ?2 WHERE user_id = ?1",
                params![id.0, blocked as i64],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn set_language(&self, id: UserId, lang: &str) -> Result<(), StorageError> {
        let lang = lang.to_string();
        self.run(move |conn| {
            let changed = conn.execute("UPDATE users SET lang = ?2 WHERE user_id = ?1", params![id.0, lang])?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("user {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_active_ids(&self) -> Result<Vec<UserId>, StorageError> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM users WHERE is_blocked = 0 ORDER BY user_id")?;
            let ids = stmt
                .query_map([], |row| Ok(UserId(row.get(0)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl StateStore for SqliteStorage {
    async fn get(&self, user: UserId) -> Result<ConversationState, StorageError> {
        self.run(move |conn| read_state(conn, user)).await
    }

    async fn set(&self, user: UserId, tag: StateTag) -> Result<(), StorageError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO conversation_states (user_id, tag, data, updated_at) VALUES (?1, ?2, '{}', ?3)
                 ON CONFLICT(user_id) DO UPDATE SET tag = excluded.tag, updated_at = excluded.updated_at",
                params![user.0, tag.as_str(), now_text()],
            )?;
            Ok(())
        })
        .await
    }

    async fn merge_data(&self, user: UserId, partial: DataBag) -> Result<(), StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut state = read_state(&tx, user)?;
            state.data.extend(partial);
            write_state(&tx, user, &state)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, user: UserId) -> Result<(), StorageError> {
        self.run(move |conn| {
            conn.execute("DELETE FROM conversation_states WHERE user_id = ?1", params![user.0])?;
            Ok(())
        })
        .await
    }

    async fn transition(&self, user: UserId, tag: StateTag, partial: DataBag) -> Result<(), StorageError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut state = read_state(&tx, user)?;
            state.data.extend(partial);
            state.tag = Some(tag);
            write_state(&tx, user, &state)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl EventLog for SqliteStorage {
    async fn record(&self, event: &AuditEvent) -> Result<(), StorageError> {
        let user = event.user_id;
        let kind = event.kind;
        let state = event.state.clone();
        let payload = serde_json::to_string(&event.payload)?;
        let at = event.at.to_rfc3339();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO events (user_id, kind, state, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.0, kind, state, payload, at],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ChatHistoryStore for SqliteStorage {
    async fn append(&self, user: UserId, turn: ChatTurn) -> Result<(), StorageError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO chat_messages (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user.0, turn.role.as_ref(), turn.content, now_text()],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent(&self, user: UserId, limit: usize) -> Result<Vec<ChatTurn>, StorageError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content FROM (
                     SELECT id, role, content FROM chat_messages WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
                 ) ORDER BY id ASC",
            )?;
            let turns = stmt
                .query_map(params![user.0, limit as i64], |row| {
                    let role: String = row.get(0)?;
                    let role = ChatRole::from_str(&role)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
                    Ok(ChatTurn {
                        role,
                        content: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(turns)
        })
        .await
    }

    async fn clear(&self, user: UserId) -> Result<(), StorageError> {
        self.run(move |conn| {
            conn.execute("DELETE FROM chat_messages WHERE user_id = ?1", params![user.0])?;
            Ok(())
        })
        .await
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        owner: UserId(row.get(1)?),
        category_id: row.get(2)?,
        name: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_ts(5, row.get(5)?)?,
    })
}

#[async_trait]
impl ItemStore for SqliteStorage {
    async fn categories(&self) -> Result<Vec<Category>, StorageError> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM item_categories ORDER BY id")?;
            let categories = stmt
                .query_map([], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(categories)
        })
        .await
    }

    async fn category(&self, id: i64) -> Result<Option<Category>, StorageError> {
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name FROM item_categories WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(Category {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn create_item(&self, item: NewItem) -> Result<Item, StorageError> {
        self.run(move |conn| {
            let created = conn.query_row(
                "INSERT INTO items (owner_id, category_id, name, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id, owner_id, category_id, name, content, created_at",
                params![item.owner.0, item.category_id, item.name, item.content, now_text()],
                item_from_row,
            )?;
            Ok(created)
        })
        .await
    }

    async fn items_by_owner(&self, owner: UserId) -> Result<Vec<Item>, StorageError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, category_id, name, content, created_at FROM items
                 WHERE owner_id = ?1 ORDER BY id DESC",
            )?;
            let items = stmt
                .query_map(params![owner.0], item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<(String, i64, String, String, Option<i64>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn decode_job(raw: (String, i64, String, String, Option<i64>, String)) -> Result<BroadcastJob, StorageError> {
    let (id, fire_at, recipients, payload, created_by, created_at) = raw;
    let id = Uuid::parse_str(&id).map_err(|e| StorageError::NotFound(format!("bad job id {}: {}", id, e)))?;
    let fire_at = Utc
        .timestamp_opt(fire_at, 0)
        .single()
        .ok_or_else(|| StorageError::NotFound(format!("bad fire_at for job {}", id)))?;
    Ok(BroadcastJob {
        id,
        fire_at,
        recipients: serde_json::from_str(&recipients)?,
        payload: serde_json::from_str(&payload)?,
        created_by: created_by.map(UserId),
        created_at: parse_ts(5, created_at)?,
    })
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn save(&self, job: &BroadcastJob) -> Result<(), StorageError> {
        let id = job.id.to_string();
        let fire_at = job.fire_at.timestamp();
        let recipients = serde_json::to_string(&job.recipients)?;
        let payload = serde_json::to_string(&job.payload)?;
        let created_by = job.created_by.map(|u| u.0);
        let created_at = job.created_at.to_rfc3339();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO broadcast_jobs (id, fire_at, recipients, payload, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, fire_at, recipients, payload, created_by, created_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: Uuid) -> Result<(), StorageError> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM broadcast_jobs WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn pending_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<BroadcastJob>, StorageError> {
        let (from, to) = (from.timestamp(), to.timestamp());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, fire_at, recipients, payload, created_by, created_at FROM broadcast_jobs
                 WHERE fire_at >= ?1 AND fire_at < ?2 ORDER BY fire_at, created_at",
            )?;
            let rows = stmt
                .query_map(params![from, to], job_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_job).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag;
    use crate::broadcast::BroadcastPayload;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn storage() -> (TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let storage = SqliteStorage::open(path.to_str().unwrap()).unwrap();
        (dir, storage)
    }

    fn profile(first: &str, username: Option<&str>) -> Profile {
        Profile {
            username: username.map(str::to_string),
            first_name: first.to_string(),
            last_name: None,
            language_code: Some("ru-RU".to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_updates_names() {
        let (_dir, db) = storage();
        let first = db.upsert(UserId(42), &profile("Ann", Some("ann"))).await.unwrap();
        assert_eq!(first.role, Role::User);
        assert_eq!(first.lang.as_deref(), Some("ru"));

        db.set_language(UserId(42), "en").await.unwrap();
        let second = db.upsert(UserId(42), &profile("Anna", Some("anna"))).await.unwrap();

        assert_eq!(second.first_name, "Anna");
        assert_eq!(second.username.as_deref(), Some("anna"));
        assert_eq!(second.lang.as_deref(), Some("en"));
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(db.list_active_ids().await.unwrap(), vec![UserId(42)]);
    }

    #[tokio::test]
    async fn test_role_and_block() {
        let (_dir, db) = storage();
        db.upsert(UserId(1), &profile("Ann", Some("Ann_L"))).await.unwrap();
        db.upsert(UserId(2), &profile("Bob", None)).await.unwrap();

        db.set_role(UserId(1), Role::Admin).await.unwrap();
        assert!(IdentityStore::get(&db, UserId(1)).await.unwrap().unwrap().is_admin());

        // unknown users get a bare record
        db.set_role(UserId(99), Role::Admin).await.unwrap();
        assert!(IdentityStore::get(&db, UserId(99)).await.unwrap().unwrap().is_admin());

        assert!(db.set_blocked(UserId(2), true).await.unwrap());
        assert!(!db.set_blocked(UserId(3), true).await.unwrap());
        assert_eq!(db.list_active_ids().await.unwrap(), vec![UserId(1), UserId(99)]);

        let found = db.find_by_username("@ann_l").await.unwrap().unwrap();
        assert_eq!(found.id, UserId(1));
    }

    #[tokio::test]
    async fn test_durable_state() {
        let (_dir, db) = storage();
        let user = UserId(5);
        let a = StateTag::from_static("flow.a");
        let b = StateTag::from_static("flow.b");

        db.transition(user, a, bag! { "x" => 1i64 }).await.unwrap();
        db.transition(user, b.clone(), bag! { "y" => "two" }).await.unwrap();
        let state = StateStore::get(&db, user).await.unwrap();
        assert_eq!(state.tag, Some(b));
        assert_eq!(state.data, bag! { "x" => 1i64, "y" => "two" });

        StateStore::clear(&db, user).await.unwrap();
        assert!(StateStore::get(&db, user).await.unwrap().is_idle());
    }

    #[tokio::test]
    async fn test_chat_history_window() {
        let (_dir, db) = storage();
        let user = UserId(7);
        for i in 0..5 {
            db.append(user, ChatTurn::user(format!("q{}", i))).await.unwrap();
            db.append(user, ChatTurn::assistant(format!("a{}", i))).await.unwrap();
        }

        let recent = db.recent(user, 3).await.unwrap();
        assert_eq!(
            recent,
            vec![ChatTurn::assistant("a3"), ChatTurn::user("q4"), ChatTurn::assistant("a4")]
        );
        assert_eq!(db.recent(user, 100).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_items() {
        let (_dir, db) = storage();
        let categories = db.categories().await.unwrap();
        assert_eq!(categories.len(), 4);

        let item = db
            .create_item(NewItem {
                owner: UserId(3),
                category_id: categories[0].id,
                name: "Dune".into(),
                content: "sand".into(),
            })
            .await
            .unwrap();
        assert_eq!(db.items_by_owner(UserId(3)).await.unwrap(), vec![item]);
        assert!(db.category(1000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_range_scan() {
        let (_dir, db) = storage();
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let job = |offset: i64| BroadcastJob {
            id: Uuid::new_v4(),
            fire_at: base + chrono::Duration::seconds(offset),
            recipients: vec![UserId(1), UserId(2)],
            payload: BroadcastPayload {
                text: Some("hello".into()),
                photo: None,
            },
            created_by: Some(UserId(1)),
            created_at: base,
        };
        let (late, early) = (job(60), job(10));
        db.save(&late).await.unwrap();
        db.save(&early).await.unwrap();

        let all = db.pending_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC).await.unwrap();
        assert_eq!(all, vec![early.clone(), late.clone()]);

        let window = db.pending_between(base, base + chrono::Duration::seconds(30)).await.unwrap();
        assert_eq!(window, vec![early.clone()]);

        db.remove(early.id).await.unwrap();
        assert_eq!(
            db.pending_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC).await.unwrap(),
            vec![late]
        );
    }
}
