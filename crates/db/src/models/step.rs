use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, SqlitePool, sqlite::SqliteRow};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("step not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }
}

impl FromStr for StepStatus {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => StepStatus::Pending,
            "running" => StepStatus::Running,
            "completed" => StepStatus::Completed,
            "failed" => StepStatus::Failed,
            "skipped" => StepStatus::Skipped,
            "cancelled" => StepStatus::Cancelled,
            other => {
                return Err(StepError::Database(sqlx::Error::Decode(
                    format!("unknown step status: {other}").into(),
                )));
            }
        })
    }
}

/// One entry in a task's pipeline. Steps are created once at task-creation time
/// (dense, 0-based `order` within a task) and mutated in place thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub task_id: Uuid,
    pub order: i64,
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub log: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
}

impl FromRow<'_, SqliteRow> for Step {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let status_str: String = row.try_get("status")?;
        let status = StepStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: Box::new(e),
        })?;

        Ok(Step {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            order: row.try_get("step_order")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status,
            log: row.try_get("log")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: row.try_get("retry_count")?,
        })
    }
}

/// A named pipeline entry handed to `Task::create` by the caller (the step
/// catalog lives in `relforge-executors`; this crate only persists whatever
/// list it's given).
#[derive(Debug, Clone)]
pub struct StepDef {
    pub name: &'static str,
    pub description: &'static str,
}

impl Step {
    pub async fn list_for_task(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<Self>, StepError> {
        let steps = sqlx::query_as::<_, Step>(
            "SELECT * FROM build_task_steps WHERE task_id = ? ORDER BY step_order ASC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(steps)
    }

    pub async fn mark_running(pool: &SqlitePool, id: Uuid) -> Result<(), StepError> {
        sqlx::query(
            "UPDATE build_task_steps SET status = 'running', started_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(pool: &SqlitePool, id: Uuid, log: Option<&str>) -> Result<(), StepError> {
        sqlx::query(
            r#"UPDATE build_task_steps
               SET status = 'completed', log = COALESCE(?, log),
                   completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(log)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(pool: &SqlitePool, id: Uuid, error: &str) -> Result<(), StepError> {
        sqlx::query(
            r#"UPDATE build_task_steps
               SET status = 'failed', error = ?,
                   completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(pool: &SqlitePool, id: Uuid, log: Option<&str>) -> Result<(), StepError> {
        sqlx::query(
            r#"UPDATE build_task_steps
               SET status = 'skipped', log = COALESCE(?, log),
                   completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(log)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_cancelled(pool: &SqlitePool, id: Uuid) -> Result<(), StepError> {
        sqlx::query(
            "UPDATE build_task_steps SET status = 'cancelled', completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn append_log(pool: &SqlitePool, id: Uuid, line: &str) -> Result<(), StepError> {
        sqlx::query(
            r#"UPDATE build_task_steps
               SET log = COALESCE(log || char(10), '') || ?
               WHERE id = ?"#,
        )
        .bind(line)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Reset a step back to `pending`, clearing its log/error and bumping
    /// `retry_count`. Used by `Task::retry`.
    pub async fn reset(pool: &SqlitePool, id: Uuid) -> Result<(), StepError> {
        sqlx::query(
            r#"UPDATE build_task_steps
               SET status = 'pending', log = NULL, error = NULL,
                   started_at = NULL, completed_at = NULL,
                   retry_count = retry_count + 1
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
