//! Cleaning queue database operations

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Serialize, Serializer};
use sqlx::SqlitePool;

use crate::error::{AppError, Result};

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Queued,
    InProgress,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "Queued",
            QueueStatus::InProgress => "In Progress",
            QueueStatus::Done => "Done",
            QueueStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Queued" => Ok(QueueStatus::Queued),
            "In Progress" => Ok(QueueStatus::InProgress),
            "Done" => Ok(QueueStatus::Done),
            "Failed" => Ok(QueueStatus::Failed),
            other => Err(AppError::Internal(format!("Unknown queue status: {}", other))),
        }
    }
}

impl Serialize for QueueStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Queue record
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: i64,
    /// Stored upload name, also used for the cleaned output
    pub name: String,
    pub status: QueueStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    name: String,
    status: String,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = AppError;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(QueueItem {
            id: row.id,
            name: row.name,
            status: row.status.parse()?,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Queue repository
pub struct QueueRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> QueueRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a stored upload, returning its id
    pub async fn add(&self, name: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO queue (name, status, created_at, updated_at)
            VALUES (?, 'Queued', ?, ?)
            "#,
        )
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a job by id
    pub async fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, name, status, error, created_at, updated_at
            FROM queue
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(QueueItem::try_from).transpose()
    }

    /// Move the oldest queued job to In Progress and return it.
    ///
    /// The select and the update run as one statement, so two workers never
    /// claim the same job.
    pub async fn claim_next(&self) -> Result<Option<QueueItem>> {
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE queue
            SET status = 'In Progress', updated_at = ?
            WHERE id = (
                SELECT id FROM queue
                WHERE status = 'Queued'
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, name, status, error, created_at, updated_at
            "#,
        )
        .bind(&now)
        .fetch_optional(self.pool)
        .await?;

        row.map(QueueItem::try_from).transpose()
    }

    /// Put jobs an interrupted worker left `In Progress` back in the queue.
    /// Returns how many were requeued.
    pub async fn requeue_in_progress(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE queue
            SET status = 'Queued', updated_at = ?
            WHERE status = 'In Progress'
            "#,
        )
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn mark_done(&self, id: i64) -> Result<()> {
        self.set_status(id, QueueStatus::Done, None).await
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        self.set_status(id, QueueStatus::Failed, Some(error)).await
    }

    async fn set_status(&self, id: i64, status: QueueStatus, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE queue
            SET status = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(&now)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Queue item not found: {}", id)));
        }

        Ok(())
    }
}
