//! Storage layer: entity models, the repository contract and its backends.
//!
//! Holds DB pool setup and migration runner for the SQLite backend.

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use error::{Result, StorageError};
pub use memory::InMemoryRepository;
pub use repository::Repository;
pub use sqlite::SqliteRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        // A private in-memory database only lives as long as its connection.
        opts = opts.max_connections(1).idle_timeout(None).max_lifetime(None);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect_with(options).await?;
    tracing::debug!(url = %url, "sqlite pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
