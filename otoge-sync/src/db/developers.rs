//! Developer registry
//!
//! Applications create a developer row in the disabled state with a fresh
//! random token. An operator enables the row out of band; only enabled tokens
//! pass the `x-developer-token` gate.

use chrono::{DateTime, Utc};
use otoge_common::Result;
use rand::RngCore;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

/// Registered developer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Developer {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// 16 random bytes, hex encoded
fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Register a developer application (disabled until approved)
pub async fn apply(pool: &SqlitePool, name: &str, description: Option<&str>) -> Result<Developer> {
    let token = generate_token();
    let created_at = otoge_common::time::now();

    let result = sqlx::query(
        "INSERT INTO developers (name, token, description, enabled, created_at) VALUES (?, ?, ?, 0, ?)",
    )
    .bind(name)
    .bind(&token)
    .bind(description)
    .bind(created_at)
    .execute(pool)
    .await?;

    tracing::info!(name, "Developer application recorded");

    Ok(Developer {
        id: result.last_insert_rowid(),
        name: name.to_string(),
        token,
        description: description.map(str::to_string),
        enabled: false,
        created_at,
    })
}

/// Look up a developer by token
pub async fn find_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Developer>> {
    let row = sqlx::query(
        "SELECT id, name, token, description, enabled, created_at FROM developers WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(Developer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        token: row.try_get("token")?,
        description: row.try_get("description")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
    }))
}

/// Tokens of every enabled developer
pub async fn load_enabled_tokens(pool: &SqlitePool) -> Result<HashSet<String>> {
    let tokens: Vec<String> = sqlx::query_scalar("SELECT token FROM developers WHERE enabled = 1")
        .fetch_all(pool)
        .await?;
    Ok(tokens.into_iter().collect())
}

/// Approve or suspend a developer; returns false if the token is unknown
pub async fn set_enabled(pool: &SqlitePool, token: &str, enabled: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE developers SET enabled = ? WHERE token = ?")
        .bind(enabled)
        .bind(token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
