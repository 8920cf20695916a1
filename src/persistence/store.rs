//! SQLite-based checkpoint store

use crate::core::error::PipelineError;
use crate::core::step::StepRecord;
use crate::persistence::{needs_insert, CheckpointEntry, CheckpointStore};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// SQLite checkpoint store, scoped to one run name
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    run_name: String,
}

impl SqliteCheckpointStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn open(db_path: &Path, run_name: &str) -> Result<Self, PipelineError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path.display())).await?;

        let store = Self {
            pool,
            run_name: run_name.to_string(),
        };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_name TEXT NOT NULL,
                step TEXT NOT NULL,
                iteration INTEGER,
                position INTEGER NOT NULL,
                completed_at TEXT NOT NULL,
                exit_code INTEGER NOT NULL,
                PRIMARY KEY (run_name, step)
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoint_position ON checkpoints(run_name, position);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn entry_from_row(row: &SqliteRow) -> Result<CheckpointEntry, PipelineError> {
        Ok(CheckpointEntry {
            step: row.try_get("step")?,
            iteration: row.try_get::<Option<i64>, _>("iteration")?.map(|i| i as usize),
            position: row.try_get::<i64, _>("position")? as usize,
            completed_at: Self::from_naive(row.try_get("completed_at")?),
            exit_code: row.try_get::<i64, _>("exit_code")? as i32,
        })
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn entries(&self) -> Result<Vec<CheckpointEntry>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT step, iteration, position, completed_at, exit_code
            FROM checkpoints
            WHERE run_name = ?1
            ORDER BY position ASC
            "#,
        )
        .bind(&self.run_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn has(&self, step: &str) -> Result<bool, PipelineError> {
        let row = sqlx::query("SELECT 1 FROM checkpoints WHERE run_name = ?1 AND step = ?2")
            .bind(&self.run_name)
            .bind(step)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_complete(&self, step: &StepRecord, exit_code: i32) -> Result<(), PipelineError> {
        let entry = CheckpointEntry::for_step(step, exit_code);
        let existing = sqlx::query(
            r#"
            SELECT step, iteration, position, completed_at, exit_code
            FROM checkpoints
            WHERE run_name = ?1 AND step = ?2
            "#,
        )
        .bind(&self.run_name)
        .bind(&entry.step)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| Self::entry_from_row(&row))
        .transpose()?;

        if !needs_insert(existing.as_ref(), &entry)? {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO checkpoints
            (run_name, step, iteration, position, completed_at, exit_code)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&self.run_name)
        .bind(&entry.step)
        .bind(entry.iteration.map(|i| i as i64))
        .bind(entry.position as i64)
        .bind(Self::to_naive(entry.completed_at))
        .bind(entry.exit_code as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM checkpoints WHERE run_name = ?1")
            .bind(&self.run_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn discard_from(&self, position: usize) -> Result<usize, PipelineError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE run_name = ?1 AND position >= ?2")
            .bind(&self.run_name)
            .bind(position as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn latest_completed_iteration(&self) -> Result<usize, PipelineError> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(iteration) FROM checkpoints WHERE run_name = ?1")
                .bind(&self.run_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(latest.unwrap_or(0) as usize)
    }
}
