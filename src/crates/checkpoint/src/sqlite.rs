//! SQLite checkpoint backend.
//!
//! One row per session in `research_checkpoints`, upserted on save.
//! Timestamps are stored as RFC 3339 text, the state blob as JSON text.

use crate::error::{CheckpointError, Result};
use crate::store::CheckpointStore;
use crate::types::{CheckpointInfo, CheckpointSnapshot, CheckpointStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;
use uuid::Uuid;

/// Durable checkpoint store on SQLite.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Connect to the database and run migrations.
    ///
    /// `database_url` accepts any sqlx SQLite URL, e.g.
    /// `sqlite:deepcurrent.db?mode=rwc` or `sqlite::memory:`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // An in-memory database exists per connection, so the pool must
        // not grow past one for `sqlite::memory:`.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(database_url, "checkpoint store ready");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (migrations are the caller's concern).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: String,
    session_id: String,
    user_id: Option<String>,
    query: String,
    phase: String,
    iteration: i64,
    status: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CheckpointRow {
    fn into_info(self) -> Result<CheckpointInfo> {
        let status = CheckpointStatus::parse(&self.status).ok_or_else(|| {
            CheckpointError::CorruptRecord(format!("unknown status '{}'", self.status))
        })?;

        Ok(CheckpointInfo {
            id: self.id,
            session_id: self.session_id,
            user_id: self.user_id,
            query: self.query,
            phase: self.phase,
            iteration: self.iteration.max(0) as u32,
            status,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, snapshot: &CheckpointSnapshot) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let state_json = serde_json::to_string(&snapshot.state)?;
        let new_id = Uuid::new_v4().to_string();

        let row: (String,) = sqlx::query_as(
            "INSERT INTO research_checkpoints
                 (id, session_id, user_id, query, phase, iteration, state_json, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'running', ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 query = excluded.query,
                 phase = excluded.phase,
                 iteration = excluded.iteration,
                 state_json = excluded.state_json,
                 status = 'running',
                 updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(&new_id)
        .bind(&snapshot.session_id)
        .bind(&snapshot.user_id)
        .bind(&snapshot.query)
        .bind(&snapshot.phase)
        .bind(snapshot.iteration as i64)
        .bind(&state_json)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn load(&self, session_id: &str) -> Result<Option<Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM research_checkpoints WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((state_json,)) => Ok(Some(serde_json::from_str(&state_json)?)),
            None => Ok(None),
        }
    }

    async fn get_info(&self, session_id: &str) -> Result<Option<CheckpointInfo>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT id, session_id, user_id, query, phase, iteration, status, error_message, created_at, updated_at
             FROM research_checkpoints WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CheckpointRow::into_info).transpose()
    }

    async fn list(
        &self,
        user_id: Option<&str>,
        status: Option<CheckpointStatus>,
        limit: usize,
    ) -> Result<Vec<CheckpointInfo>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT id, session_id, user_id, query, phase, iteration, status, error_message, created_at, updated_at
             FROM research_checkpoints ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut infos = Vec::new();
        for row in rows {
            let info = row.into_info()?;
            if user_id.map_or(true, |u| info.user_id.as_deref() == Some(u))
                && status.map_or(true, |s| info.status == s)
            {
                infos.push(info);
                if infos.len() >= limit {
                    break;
                }
            }
        }
        Ok(infos)
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: CheckpointStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE research_checkpoints
             SET status = ?, error_message = COALESCE(?, error_message), updated_at = ?
             WHERE session_id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(&now)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM research_checkpoints WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
