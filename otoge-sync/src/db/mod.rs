//! Database access for otoge-sync
//!
//! SQLite via sqlx. Tables are created on startup if missing.

pub mod developers;
pub mod scores;

pub use scores::{MergeSummary, ScoreStore, StoreError};

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Initialize database connection pool for a database file
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    tracing::debug!("Connecting to database: {}", db_path.display());

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database on a single pinned connection (tests, ephemeral runs)
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the scores and developers tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // achievements: ten-thousandths of a percent
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL,
            song_id INTEGER NOT NULL,
            chart_type TEXT NOT NULL,
            level_index INTEGER NOT NULL,
            achievements INTEGER NOT NULL DEFAULT 0,
            dx_score INTEGER NOT NULL DEFAULT 0,
            dx_rating REAL,
            play_count INTEGER NOT NULL DEFAULT 0,
            fc TEXT,
            fs TEXT,
            rate TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (uuid, song_id, chart_type, level_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scores_uuid ON scores (uuid)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS developers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            token TEXT NOT NULL UNIQUE,
            description TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (scores, developers)");

    Ok(())
}
