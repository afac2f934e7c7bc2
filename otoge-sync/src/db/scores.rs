//! Score store
//!
//! Owns the persisted score rows of every player, one row per
//! (uuid, song_id, chart_type, level_index). Callers serialize writers per
//! player through the identity lock; the store only guarantees that one
//! `upsert_merge` call reads a consistent snapshot and commits all-or-nothing.

use chrono::{DateTime, Utc};
use otoge_common::{
    merge, Achievement, ChartType, FcType, FsType, LevelIndex, PlayerIdentity, RateType,
    ScoreError, ScoreKey, ScoreRecord,
};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

const SELECT_SCORES: &str = r#"
    SELECT song_id, chart_type, level_index, achievements, dx_score, dx_rating,
           play_count, fc, fs, rate, created_at, updated_at
    FROM scores
"#;

/// Score store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// An incoming record could not be merged
    #[error(transparent)]
    Merge(#[from] ScoreError),

    /// Storage unreachable or the transaction failed
    #[error("score store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// A stored row could not be decoded
    #[error("corrupt score row: {0}")]
    Corrupt(String),
}

/// Outcome counts of one `upsert_merge` batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Incoming records that changed stored state
    pub applied: usize,
    /// Incoming records that changed nothing
    pub unchanged: usize,
}

/// Persistence boundary for player score sets
#[derive(Clone)]
pub struct ScoreStore {
    pool: SqlitePool,
}

impl ScoreStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All records of one player, in key order
    pub async fn read_all(&self, identity: &PlayerIdentity) -> Result<Vec<ScoreRecord>, StoreError> {
        let sql = format!("{} WHERE uuid = ? ORDER BY song_id, chart_type, level_index", SELECT_SCORES);
        let rows = sqlx::query(&sql)
            .bind(identity.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Records of one song across every chart type and difficulty.
    ///
    /// DX charts carry a +10000 id offset, so matching is on `song_id % 10000`.
    pub async fn read_one(
        &self,
        identity: &PlayerIdentity,
        song_id: u32,
    ) -> Result<Vec<ScoreRecord>, StoreError> {
        let sql = format!(
            "{} WHERE uuid = ? AND song_id % 10000 = ? ORDER BY song_id, chart_type, level_index",
            SELECT_SCORES
        );
        let rows = sqlx::query(&sql)
            .bind(identity.as_str())
            .bind(i64::from(song_id % 10_000))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Merge a batch of observations into the player's stored set.
    ///
    /// Records sharing a key within the batch are merged one after another,
    /// so the final row reflects all of them. Nothing is written unless every
    /// record merges and every write succeeds.
    pub async fn upsert_merge(
        &self,
        identity: &PlayerIdentity,
        incoming: &[ScoreRecord],
    ) -> Result<MergeSummary, StoreError> {
        let now = otoge_common::time::now();
        // Take the write lock before the snapshot read; a deferred transaction
        // would fail with SQLITE_BUSY when upgrading past another writer.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let sql = format!("{} WHERE uuid = ?", SELECT_SCORES);
        let rows = sqlx::query(&sql)
            .bind(identity.as_str())
            .fetch_all(&mut *tx)
            .await?;
        let mut current: HashMap<ScoreKey, ScoreRecord> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let record = decode_row(row)?;
            current.insert(record.key(), record);
        }

        let mut summary = MergeSummary::default();
        let mut dirty = BTreeSet::new();
        for record in incoming {
            let key = record.key();
            let outcome = merge(current.get(&key), record, now)?;
            if outcome.changed {
                summary.applied += 1;
                dirty.insert(key);
                current.insert(key, outcome.record);
            } else {
                summary.unchanged += 1;
            }
        }

        for key in &dirty {
            if let Some(record) = current.get(key) {
                write_record(&mut tx, identity, record).await?;
            }
        }

        tx.commit().await?;

        tracing::debug!(
            identity = %identity,
            applied = summary.applied,
            unchanged = summary.unchanged,
            "Score batch merged"
        );

        Ok(summary)
    }
}

async fn write_record(
    conn: &mut SqliteConnection,
    identity: &PlayerIdentity,
    record: &ScoreRecord,
) -> Result<(), sqlx::Error> {
    let now = otoge_common::time::now();
    sqlx::query(
        r#"
        INSERT INTO scores (
            uuid, song_id, chart_type, level_index, achievements, dx_score,
            dx_rating, play_count, fc, fs, rate, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uuid, song_id, chart_type, level_index) DO UPDATE SET
            achievements = excluded.achievements,
            dx_score = excluded.dx_score,
            dx_rating = excluded.dx_rating,
            play_count = excluded.play_count,
            fc = excluded.fc,
            fs = excluded.fs,
            rate = excluded.rate,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(identity.as_str())
    .bind(i64::from(record.song_id))
    .bind(record.chart_type.as_str())
    .bind(i64::from(record.level_index.code()))
    .bind(i64::from(record.achievements.ten_thousandths()))
    .bind(i64::from(record.dx_score))
    .bind(record.dx_rating)
    .bind(i64::from(record.play_count))
    .bind(record.fc.map(FcType::as_str))
    .bind(record.fs.map(FsType::as_str))
    .bind(record.rate.as_str())
    .bind(record.created_at.unwrap_or(now))
    .bind(record.updated_at.unwrap_or(now))
    .execute(conn)
    .await?;
    Ok(())
}

fn decode_row(row: &SqliteRow) -> Result<ScoreRecord, StoreError> {
    let corrupt = |field: &str, detail: String| StoreError::Corrupt(format!("{}: {}", field, detail));
    let unsigned = |field: &str| -> Result<u32, StoreError> {
        let value: i64 = row.try_get(field)?;
        u32::try_from(value).map_err(|_| corrupt(field, value.to_string()))
    };

    let chart_type: String = row.try_get("chart_type")?;
    let level_index = unsigned("level_index")?;
    let fc: Option<String> = row.try_get("fc")?;
    let fs: Option<String> = row.try_get("fs")?;
    let rate: String = row.try_get("rate")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(ScoreRecord {
        song_id: unsigned("song_id")?,
        chart_type: chart_type
            .parse::<ChartType>()
            .map_err(|e| corrupt("chart_type", e))?,
        level_index: u8::try_from(level_index)
            .ok()
            .and_then(LevelIndex::from_code)
            .ok_or_else(|| corrupt("level_index", level_index.to_string()))?,
        achievements: Achievement::from_ten_thousandths(unsigned("achievements")?),
        dx_score: unsigned("dx_score")?,
        dx_rating: row.try_get("dx_rating")?,
        play_count: unsigned("play_count")?,
        fc: fc
            .map(|v| v.parse::<FcType>())
            .transpose()
            .map_err(|e| corrupt("fc", e))?,
        fs: fs
            .map(|v| v.parse::<FsType>())
            .transpose()
            .map_err(|e| corrupt("fs", e))?,
        rate: rate.parse::<RateType>().map_err(|e| corrupt("rate", e))?,
        created_at: Some(created_at),
        updated_at: Some(updated_at),
    })
}
