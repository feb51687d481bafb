//! SQLite persistence: connection pool, embedded migrations and the store implementations.

pub mod db;
pub mod migrations;
mod sqlite;

pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use sqlite::SqliteStorage;
