use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, SqlitePool, sqlite::SqliteRow};
use thiserror::Error;
use uuid::Uuid;

use super::project::Project;
use super::step::StepDef;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("task not found")]
    NotFound,
    #[error("project not found")]
    ProjectNotFound,
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("task {0} is running; cannot {1}")]
    IllegalTransition(Uuid, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Normal,
    ChangelogOnly,
    CrpOnly,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildMode::Normal => "normal",
            BuildMode::ChangelogOnly => "changelog_only",
            BuildMode::CrpOnly => "crp_only",
        }
    }
}

impl FromStr for BuildMode {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(BuildMode::Normal),
            "changelog_only" => Ok(BuildMode::ChangelogOnly),
            "crp_only" => Ok(BuildMode::CrpOnly),
            other => Err(TaskError::UnsupportedMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => TaskStatus::Pending,
            "running" => TaskStatus::Running,
            "paused" => TaskStatus::Paused,
            "success" => TaskStatus::Success,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            other => return Err(TaskError::UnsupportedMode(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub mode: BuildMode,
    pub version: String,
    pub architectures: Vec<String>,
    pub topic_id: Option<String>,
    pub topic_name: Option<String>,
    pub start_head: Option<String>,
    pub status: TaskStatus,
    pub current_step_index: i64,
    pub error: Option<String>,
    pub review_branch: Option<String>,
    pub review_number: Option<i64>,
    pub review_url: Option<String>,
    pub review_state: Option<String>,
    pub mirror_synced: bool,
    pub mirror_head: Option<String>,
    pub build_id: Option<String>,
    pub build_state: Option<String>,
    pub build_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, SqliteRow> for Task {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let mode_str: String = row.try_get("mode")?;
        let mode = BuildMode::from_str(&mode_str).map_err(|e| sqlx::Error::ColumnDecode {
            index: "mode".into(),
            source: Box::new(e),
        })?;
        let status_str: String = row.try_get("status")?;
        let status = TaskStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: Box::new(e),
        })?;
        let architectures_json: String = row.try_get("architectures")?;
        let architectures: Vec<String> =
            serde_json::from_str(&architectures_json).unwrap_or_default();
        let mirror_synced: i64 = row.try_get("mirror_synced")?;

        Ok(Task {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            project_name: row.try_get("project_name")?,
            mode,
            version: row.try_get("version")?,
            architectures,
            topic_id: row.try_get("topic_id")?,
            topic_name: row.try_get("topic_name")?,
            start_head: row.try_get("start_head")?,
            status,
            current_step_index: row.try_get("current_step_index")?,
            error: row.try_get("error")?,
            review_branch: row.try_get("review_branch")?,
            review_number: row.try_get("review_number")?,
            review_url: row.try_get("review_url")?,
            review_state: row.try_get("review_state")?,
            mirror_synced: mirror_synced != 0,
            mirror_head: row.try_get("mirror_head")?,
            build_id: row.try_get("build_id")?,
            build_state: row.try_get("build_state")?,
            build_url: row.try_get("build_url")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTask {
    pub project_id: Uuid,
    pub mode: BuildMode,
    pub version: String,
    pub architectures: Vec<String>,
    pub topic_id: Option<String>,
    pub topic_name: Option<String>,
    pub start_head: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Task {
    /// Create a task in `pending` and materialize its step list from `steps`
    /// (the mode's catalog, supplied by the caller — see `relforge-executors`).
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateTask,
        steps: &[StepDef],
    ) -> Result<Self, TaskError> {
        let project = Project::find_by_id(pool, data.project_id)
            .await
            .map_err(|_| TaskError::ProjectNotFound)?
            .ok_or(TaskError::ProjectNotFound)?;

        let id = Uuid::new_v4();
        let architectures_json =
            serde_json::to_string(&data.architectures).unwrap_or_else(|_| "[]".into());

        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO build_tasks
               (id, project_id, project_name, mode, version, architectures,
                topic_id, topic_name, start_head, status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')"#,
        )
        .bind(id)
        .bind(project.id)
        .bind(&project.name)
        .bind(data.mode.as_str())
        .bind(&data.version)
        .bind(&architectures_json)
        .bind(&data.topic_id)
        .bind(&data.topic_name)
        .bind(&data.start_head)
        .execute(&mut *tx)
        .await?;

        for (order, def) in steps.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO build_task_steps (id, task_id, step_order, name, description, status)
                   VALUES (?, ?, ?, ?, ?, 'pending')"#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(order as i64)
            .bind(def.name)
            .bind(def.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, TaskError> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM build_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(task)
    }

    pub async fn list(pool: &SqlitePool, filter: &TaskListFilter) -> Result<Vec<Self>, TaskError> {
        let limit = filter.limit.unwrap_or(50).clamp(1, 500);
        let offset = filter.offset.unwrap_or(0).max(0);

        let tasks = match filter.status {
            Some(status) => {
                sqlx::query_as::<_, Task>(
                    "SELECT * FROM build_tasks WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Task>(
                    "SELECT * FROM build_tasks ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(tasks)
    }

    pub async fn list_running(pool: &SqlitePool) -> Result<Vec<Self>, TaskError> {
        let tasks = sqlx::query_as::<_, Task>("SELECT * FROM build_tasks WHERE status = 'running'")
            .fetch_all(pool)
            .await?;
        Ok(tasks)
    }

    /// `pending|paused -> pending` (the scheduler will pick it up).
    pub async fn start(pool: &SqlitePool, id: Uuid) -> Result<Self, TaskError> {
        let task = Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Paused) {
            return Err(TaskError::IllegalTransition(id, "start"));
        }
        sqlx::query("UPDATE build_tasks SET status = 'pending' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)
    }

    /// `running -> paused`. Raising the cancel signal on the live executor is
    /// the scheduler's job; this only flips persisted state.
    pub async fn pause(pool: &SqlitePool, id: Uuid) -> Result<Self, TaskError> {
        let task = Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)?;
        if task.status != TaskStatus::Running {
            return Err(TaskError::IllegalTransition(id, "pause"));
        }
        sqlx::query("UPDATE build_tasks SET status = 'paused' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)
    }

    pub async fn resume(pool: &SqlitePool, id: Uuid) -> Result<Self, TaskError> {
        let task = Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)?;
        if task.status != TaskStatus::Paused {
            return Err(TaskError::IllegalTransition(id, "resume"));
        }
        sqlx::query("UPDATE build_tasks SET status = 'pending' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)
    }

    /// Any non-terminal -> `cancelled`; any `pending|running` step becomes `cancelled`.
    pub async fn cancel(pool: &SqlitePool, id: Uuid) -> Result<Self, TaskError> {
        let task = Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)?;
        if task.status.is_terminal() {
            return Err(TaskError::IllegalTransition(id, "cancel"));
        }

        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"UPDATE build_tasks
               SET status = 'cancelled', completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"UPDATE build_task_steps
               SET status = 'cancelled', completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE task_id = ? AND status IN ('pending', 'running')"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)
    }

    /// Reset steps from `from_step` (inclusive) onward to `pending`, bumping
    /// their `retry_count`; a `None`/`0` value resets the whole pipeline and
    /// zeroes the task's progress fields.
    pub async fn retry(
        pool: &SqlitePool,
        id: Uuid,
        from_step: Option<i64>,
    ) -> Result<Self, TaskError> {
        let task = Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)?;
        if task.status == TaskStatus::Running {
            return Err(TaskError::IllegalTransition(id, "retry"));
        }

        let from_step = from_step.unwrap_or(0);
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"UPDATE build_task_steps
               SET status = 'pending', log = NULL, error = NULL,
                   started_at = NULL, completed_at = NULL,
                   retry_count = retry_count + 1
               WHERE task_id = ? AND step_order >= ?"#,
        )
        .bind(id)
        .bind(from_step)
        .execute(&mut *tx)
        .await?;

        if from_step == 0 {
            sqlx::query(
                r#"UPDATE build_tasks
                   SET status = 'pending', current_step_index = 0, error = NULL,
                       started_at = NULL, completed_at = NULL
                   WHERE id = ?"#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"UPDATE build_tasks
                   SET status = 'pending', error = NULL, completed_at = NULL
                   WHERE id = ?"#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), TaskError> {
        let task = Self::find_by_id(pool, id).await?.ok_or(TaskError::NotFound)?;
        if task.status == TaskStatus::Running {
            return Err(TaskError::IllegalTransition(id, "delete"));
        }
        // build_task_steps cascades via ON DELETE CASCADE.
        sqlx::query("DELETE FROM build_tasks WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn cleanup_completed(pool: &SqlitePool) -> Result<u64, TaskError> {
        let result = sqlx::query(
            "DELETE FROM build_tasks WHERE status IN ('success', 'failed', 'cancelled')",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Transition to `running`, stamping `started_at` the first time.
    pub async fn mark_running(pool: &SqlitePool, id: Uuid) -> Result<(), TaskError> {
        sqlx::query(
            r#"UPDATE build_tasks
               SET status = 'running', started_at = COALESCE(started_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_success(pool: &SqlitePool, id: Uuid) -> Result<(), TaskError> {
        sqlx::query(
            r#"UPDATE build_tasks
               SET status = 'success', completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(pool: &SqlitePool, id: Uuid, error: &str) -> Result<(), TaskError> {
        sqlx::query(
            r#"UPDATE build_tasks
               SET status = 'failed', error = ?, completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_paused(pool: &SqlitePool, id: Uuid) -> Result<(), TaskError> {
        sqlx::query("UPDATE build_tasks SET status = 'paused' WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_current_step_index(pool: &SqlitePool, id: Uuid, index: i64) -> Result<(), TaskError> {
        sqlx::query("UPDATE build_tasks SET current_step_index = ? WHERE id = ?")
            .bind(index)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_start_head(pool: &SqlitePool, id: Uuid, head: &str) -> Result<(), TaskError> {
        sqlx::query("UPDATE build_tasks SET start_head = ? WHERE id = ?")
            .bind(head)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_review(
        pool: &SqlitePool,
        id: Uuid,
        branch: Option<&str>,
        number: Option<i64>,
        url: Option<&str>,
        state: Option<&str>,
    ) -> Result<(), TaskError> {
        sqlx::query(
            r#"UPDATE build_tasks SET
                 review_branch = COALESCE(?, review_branch),
                 review_number = COALESCE(?, review_number),
                 review_url = COALESCE(?, review_url),
                 review_state = COALESCE(?, review_state)
               WHERE id = ?"#,
        )
        .bind(branch)
        .bind(number)
        .bind(url)
        .bind(state)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_mirror(pool: &SqlitePool, id: Uuid, synced: bool, head: Option<&str>) -> Result<(), TaskError> {
        sqlx::query(
            "UPDATE build_tasks SET mirror_synced = ?, mirror_head = COALESCE(?, mirror_head) WHERE id = ?",
        )
        .bind(synced)
        .bind(head)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_build(
        pool: &SqlitePool,
        id: Uuid,
        build_id: Option<&str>,
        build_state: Option<&str>,
        build_url: Option<&str>,
    ) -> Result<(), TaskError> {
        sqlx::query(
            r#"UPDATE build_tasks SET
                 build_id = COALESCE(?, build_id),
                 build_state = COALESCE(?, build_state),
                 build_url = COALESCE(?, build_url)
               WHERE id = ?"#,
        )
        .bind(build_id)
        .bind(build_state)
        .bind(build_url)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::CreateProject;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::query(include_str!("../../migrations/0001_init.sql"))
            .execute(&pool)
            .await
            .expect("apply schema");
        pool
    }

    const STEPS: &[StepDef] = &[
        StepDef { name: "check environment", description: "d0" },
        StepDef { name: "pull latest", description: "d1" },
    ];

    async fn seed_project(pool: &SqlitePool) -> Project {
        Project::create(
            pool,
            &CreateProject {
                name: "demo".into(),
                review_forge_url: Some("https://pf/owner/demo".into()),
                review_forge_branch: Some("main".into()),
                mirror_forge_url: None,
                mirror_forge_branch: None,
                mirror_clone_url: None,
                package_service_alias: None,
            },
        )
        .await
        .expect("create project")
    }

    #[tokio::test]
    async fn create_materializes_dense_step_order() {
        let pool = setup_pool().await;
        let project = seed_project(&pool).await;

        let task = Task::create(
            &pool,
            &CreateTask {
                project_id: project.id,
                mode: BuildMode::ChangelogOnly,
                version: "1.2.3".into(),
                architectures: vec!["amd64".into()],
                topic_id: None,
                topic_name: None,
                start_head: None,
            },
            STEPS,
        )
        .await
        .expect("create task");

        let steps = crate::models::Step::list_for_task(&pool, task.id)
            .await
            .expect("list steps");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].order, 0);
        assert_eq!(steps[1].order, 1);
        assert_eq!(task.current_step_index, 0);
    }

    #[tokio::test]
    async fn cancel_marks_pending_and_running_steps_cancelled() {
        let pool = setup_pool().await;
        let project = seed_project(&pool).await;
        let task = Task::create(
            &pool,
            &CreateTask {
                project_id: project.id,
                mode: BuildMode::ChangelogOnly,
                version: "1.2.3".into(),
                architectures: vec![],
                topic_id: None,
                topic_name: None,
                start_head: None,
            },
            STEPS,
        )
        .await
        .expect("create");

        Task::mark_running(&pool, task.id).await.expect("running");
        let steps = crate::models::Step::list_for_task(&pool, task.id).await.expect("steps");
        crate::models::Step::mark_running(&pool, steps[0].id).await.expect("step running");

        let cancelled = Task::cancel(&pool, task.id).await.expect("cancel");
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let steps = crate::models::Step::list_for_task(&pool, task.id).await.expect("steps");
        assert!(steps.iter().all(|s| s.status == crate::models::StepStatus::Cancelled));
    }

    #[tokio::test]
    async fn retry_from_step_resets_only_tail_and_bumps_retry_count() {
        let pool = setup_pool().await;
        let project = seed_project(&pool).await;
        let task = Task::create(
            &pool,
            &CreateTask {
                project_id: project.id,
                mode: BuildMode::ChangelogOnly,
                version: "1.2.3".into(),
                architectures: vec![],
                topic_id: None,
                topic_name: None,
                start_head: None,
            },
            STEPS,
        )
        .await
        .expect("create");

        let steps = crate::models::Step::list_for_task(&pool, task.id).await.expect("steps");
        crate::models::Step::mark_completed(&pool, steps[0].id, Some("ok"))
            .await
            .expect("complete step 0");
        crate::models::Step::mark_failed(&pool, steps[1].id, "boom")
            .await
            .expect("fail step 1");
        Task::mark_failed(&pool, task.id, "boom").await.expect("fail task");

        Task::retry(&pool, task.id, Some(1)).await.expect("retry");

        let steps = crate::models::Step::list_for_task(&pool, task.id).await.expect("steps");
        assert_eq!(steps[0].status, crate::models::StepStatus::Completed);
        assert_eq!(steps[1].status, crate::models::StepStatus::Pending);
        assert_eq!(steps[1].retry_count, 1);
    }

    #[tokio::test]
    async fn resubmitting_running_task_is_rejected_by_start() {
        let pool = setup_pool().await;
        let project = seed_project(&pool).await;
        let task = Task::create(
            &pool,
            &CreateTask {
                project_id: project.id,
                mode: BuildMode::ChangelogOnly,
                version: "1.2.3".into(),
                architectures: vec![],
                topic_id: None,
                topic_name: None,
                start_head: None,
            },
            STEPS,
        )
        .await
        .expect("create");

        Task::mark_running(&pool, task.id).await.expect("running");
        let err = Task::start(&pool, task.id).await.unwrap_err();
        assert!(matches!(err, TaskError::IllegalTransition(_, "start")));
    }
}
