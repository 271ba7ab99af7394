use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, SqlitePool, sqlite::SqliteRow};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("project not found")]
    NotFound,
    #[error("validation error: {0}")]
    Validation(String),
}

/// Clone lifecycle: `pending -> cloning -> ready | error`. Re-cloning is allowed
/// from any state (the old tree is erased first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneState {
    Pending,
    Cloning,
    Ready,
    Error,
}

impl CloneState {
    pub fn as_str(self) -> &'static str {
        match self {
            CloneState::Pending => "pending",
            CloneState::Cloning => "cloning",
            CloneState::Ready => "ready",
            CloneState::Error => "error",
        }
    }
}

impl FromStr for CloneState {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CloneState::Pending),
            "cloning" => Ok(CloneState::Cloning),
            "ready" => Ok(CloneState::Ready),
            "error" => Ok(CloneState::Error),
            other => Err(ProjectError::Validation(format!(
                "unknown clone_state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub review_forge_url: Option<String>,
    pub review_forge_branch: Option<String>,
    pub mirror_forge_url: Option<String>,
    pub mirror_forge_branch: Option<String>,
    pub mirror_clone_url: Option<String>,
    pub package_service_alias: Option<String>,
    pub clone_path: Option<String>,
    pub clone_state: CloneState,
    pub clone_error: Option<String>,
    pub last_known_head: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Project {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let clone_state_str: String = row.try_get("clone_state")?;
        let clone_state = CloneState::from_str(&clone_state_str)
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "clone_state".into(),
                source: Box::new(e),
            })?;

        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            review_forge_url: row.try_get("review_forge_url")?,
            review_forge_branch: row.try_get("review_forge_branch")?,
            mirror_forge_url: row.try_get("mirror_forge_url")?,
            mirror_forge_branch: row.try_get("mirror_forge_branch")?,
            mirror_clone_url: row.try_get("mirror_clone_url")?,
            package_service_alias: row.try_get("package_service_alias")?,
            clone_path: row.try_get("clone_path")?,
            clone_state,
            clone_error: row.try_get("clone_error")?,
            last_known_head: row.try_get("last_known_head")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields required to register a new tracked repository.
#[derive(Debug, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub review_forge_url: Option<String>,
    pub review_forge_branch: Option<String>,
    pub mirror_forge_url: Option<String>,
    pub mirror_forge_branch: Option<String>,
    pub mirror_clone_url: Option<String>,
    pub package_service_alias: Option<String>,
}

impl Project {
    pub async fn create(pool: &SqlitePool, data: &CreateProject) -> Result<Self, ProjectError> {
        if data.review_forge_url.is_none() && data.mirror_forge_url.is_none() {
            return Err(ProjectError::Validation(
                "at least one of review_forge_url or mirror_forge_url must be set".into(),
            ));
        }

        let id = Uuid::new_v4();
        let alias = data
            .package_service_alias
            .clone()
            .unwrap_or_else(|| format!("{}-v25", data.name));

        sqlx::query(
            r#"INSERT INTO projects
               (id, name, review_forge_url, review_forge_branch, mirror_forge_url,
                mirror_forge_branch, mirror_clone_url, package_service_alias, clone_state)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending')"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.review_forge_url)
        .bind(&data.review_forge_branch)
        .bind(&data.mirror_forge_url)
        .bind(&data.mirror_forge_branch)
        .bind(&data.mirror_clone_url)
        .bind(&alias)
        .execute(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(ProjectError::NotFound)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, ProjectError> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(project)
    }

    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Self>, ProjectError> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(project)
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>, ProjectError> {
        let projects =
            sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY name ASC")
                .fetch_all(pool)
                .await?;
        Ok(projects)
    }

    pub async fn list_ready(pool: &SqlitePool) -> Result<Vec<Self>, ProjectError> {
        let projects = sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE clone_state = 'ready' ORDER BY name ASC",
        )
        .fetch_all(pool)
        .await?;
        Ok(projects)
    }

    /// Transition `clone_state`. `clone_path` is only set on entry to `cloning`
    /// (invariant: `clone_path` is set iff `clone_state` is or was `ready`).
    pub async fn set_clone_state(
        pool: &SqlitePool,
        id: Uuid,
        state: CloneState,
        clone_path: Option<&str>,
        clone_error: Option<&str>,
    ) -> Result<(), ProjectError> {
        sqlx::query(
            r#"UPDATE projects
               SET clone_state = ?,
                   clone_path = COALESCE(?, clone_path),
                   clone_error = ?,
                   updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
               WHERE id = ?"#,
        )
        .bind(state.as_str())
        .bind(clone_path)
        .bind(clone_error)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_last_known_head(
        pool: &SqlitePool,
        id: Uuid,
        head: &str,
    ) -> Result<(), ProjectError> {
        sqlx::query(
            "UPDATE projects SET last_known_head = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(head)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<(), ProjectError> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn package_service_alias(&self) -> String {
        self.package_service_alias
            .clone()
            .unwrap_or_else(|| format!("{}-v25", self.name))
    }
}
