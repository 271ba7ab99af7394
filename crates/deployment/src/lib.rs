use std::sync::Arc;

use async_trait::async_trait;
use relforge_db::models::global_config::ConfigError as DbConfigError;
use relforge_db::models::project::{CreateProject, Project, ProjectError};
use relforge_db::models::task::{CreateTask, Task, TaskError, TaskListFilter};
use relforge_db::GlobalConfig;
use relforge_executors::EngineError;
use relforge_services::{PackageServiceError, ProjectSnapshot, RepositoryError};
use thiserror::Error;
use uuid::Uuid;

pub use relforge_db::models::global_config::UpdateGlobalConfig;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    PackageService(#[from] PackageServiceError),
}

/// Everything the server crate needs from a running instance of relforge.
/// `relforge-local-deployment` is the single-process implementation; the
/// trait exists so alternate topologies (e.g. a remote scheduler) can be
/// substituted without touching the HTTP layer.
#[async_trait]
pub trait Deployment: Send + Sync {
    async fn register_project(&self, data: CreateProject) -> Result<Project, DeploymentError>;
    async fn clone_project(&self, project_id: Uuid) -> Result<Project, DeploymentError>;
    async fn get_project(&self, project_id: Uuid) -> Result<Project, DeploymentError>;
    async fn list_projects(&self) -> Result<Vec<Project>, DeploymentError>;
    async fn delete_project(&self, project_id: Uuid) -> Result<(), DeploymentError>;
    async fn snapshot_projects(&self) -> Result<Vec<ProjectSnapshot>, DeploymentError>;

    async fn create_task(&self, data: CreateTask) -> Result<Task, DeploymentError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Task, DeploymentError>;
    async fn list_tasks(&self, filter: TaskListFilter) -> Result<Vec<Task>, DeploymentError>;
    async fn start_task(&self, task_id: Uuid) -> Result<Task, DeploymentError>;
    async fn pause_task(&self, task_id: Uuid) -> Result<Task, DeploymentError>;
    async fn resume_task(&self, task_id: Uuid) -> Result<Task, DeploymentError>;
    async fn cancel_task(&self, task_id: Uuid) -> Result<Task, DeploymentError>;
    async fn retry_task(&self, task_id: Uuid, from_step: Option<i64>) -> Result<Task, DeploymentError>;
    async fn delete_task(&self, task_id: Uuid) -> Result<(), DeploymentError>;
    async fn cleanup_completed_tasks(&self) -> Result<u64, DeploymentError>;

    async fn get_config(&self) -> Result<GlobalConfig, DeploymentError>;
    async fn update_config(&self, patch: UpdateGlobalConfig) -> Result<GlobalConfig, DeploymentError>;

    /// Operator-initiated remediation of a stuck CRP release, outside the
    /// step pipeline (`dispatch_build` only ever deletes-then-recreates).
    async fn retry_crp_release(&self, release_id: i64) -> Result<bool, DeploymentError>;
    async fn delete_crp_release(&self, release_id: i64) -> Result<bool, DeploymentError>;
}

pub type SharedDeployment = Arc<dyn Deployment>;
