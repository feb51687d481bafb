use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use rusqlite::Connection;

use crate::core::error::StorageError;

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

static MIGRATION_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Applies pending embedded migrations.
///
/// Serialized per process; refinery runs each migration in its own transaction.
///
/// # Returns
///
/// Number of migrations applied by this call.
pub fn run_migrations(conn: &mut Connection) -> Result<usize, StorageError> {
    let mutex = MIGRATION_LOCK.get_or_init(|| Mutex::new(()));
    // Migrations are idempotent, so a poisoned lock is safe to reuse
    let _guard = match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Migration lock was poisoned, recovering...");
            poisoned.into_inner()
        }
    };

    conn.busy_timeout(Duration::from_secs(30))?;
    let report = embedded::migrations::runner().run(conn)?;
    let applied = report.applied_migrations().len();
    if applied > 0 {
        log::info!("Applied {} database migration(s)", applied);
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), 1);
        assert_eq!(run_migrations(&mut conn).unwrap(), 0);

        let categories: i64 = conn
            .query_row("SELECT COUNT(*) FROM item_categories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(categories, 4);
    }
}
