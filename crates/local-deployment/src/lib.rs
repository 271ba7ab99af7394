use std::sync::Arc;

use async_trait::async_trait;
use relforge_db::models::global_config::UpdateGlobalConfig;
use relforge_db::models::project::{CreateProject, Project};
use relforge_db::models::task::{CreateTask, Task, TaskListFilter};
use relforge_db::{GlobalConfig, SqlitePool};
use relforge_deployment::{Deployment, DeploymentError};
use relforge_executors::engine::EngineDeps;
use relforge_executors::{catalog, Scheduler};
use relforge_services::{
    ChangelogService, InternalForgeClient, LocalToolchain, Monitor, PackageServiceClient,
    ProjectSnapshot, RepositoryService, ReviewForgeClient,
};
use uuid::Uuid;

/// Single-process deployment: one scheduler bound to one clone root and one
/// sqlite database, everything else (reviews, mirror, package builds) talked
/// to over the network from this process.
pub struct LocalDeployment {
    pool: SqlitePool,
    repository: Arc<RepositoryService>,
    changelog: Arc<ChangelogService>,
    monitor: Monitor,
    scheduler: Arc<Scheduler>,
    package_service: Arc<dyn PackageServiceClient>,
}

const SNAPSHOT_PARALLELISM: usize = 5;
const DEFAULT_MAX_CONCURRENCY: usize = 3;

impl LocalDeployment {
    pub fn new(
        pool: SqlitePool,
        review_forge: Option<Arc<dyn ReviewForgeClient>>,
        internal_forge: Option<Arc<dyn InternalForgeClient>>,
        package_service: Arc<dyn PackageServiceClient>,
        local_toolchain: Arc<LocalToolchain>,
    ) -> Arc<Self> {
        let repository = Arc::new(RepositoryService::new());
        let changelog = Arc::new(ChangelogService::new());
        let monitor = Monitor::new(repository.clone(), changelog.clone());

        let deps = Arc::new(EngineDeps {
            pool: pool.clone(),
            repository: repository.clone(),
            changelog: changelog.clone(),
            review_forge,
            internal_forge,
            package_service: package_service.clone(),
            local_toolchain,
        });
        let scheduler = Scheduler::new(pool.clone(), deps, DEFAULT_MAX_CONCURRENCY);

        Arc::new(Self {
            pool,
            repository,
            changelog,
            monitor,
            scheduler,
            package_service,
        })
    }

    /// Re-submits tasks left `running` from a prior process lifetime. Call
    /// once at startup after constructing the deployment.
    pub async fn recover(&self) {
        self.scheduler.recover().await;
    }
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn register_project(&self, data: CreateProject) -> Result<Project, DeploymentError> {
        Ok(Project::create(&self.pool, &data).await?)
    }

    async fn clone_project(&self, project_id: Uuid) -> Result<Project, DeploymentError> {
        let project = Project::find_by_id(&self.pool, project_id)
            .await?
            .ok_or(relforge_db::models::project::ProjectError::NotFound)?;
        let config = GlobalConfig::get(&self.pool).await?;

        self.repository
            .clone(&self.pool, &config.local_clone_root, config.proxy_url.as_deref(), &project)
            .await?;

        Ok(Project::find_by_id(&self.pool, project_id)
            .await?
            .ok_or(relforge_db::models::project::ProjectError::NotFound)?)
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Project, DeploymentError> {
        Ok(Project::find_by_id(&self.pool, project_id)
            .await?
            .ok_or(relforge_db::models::project::ProjectError::NotFound)?)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, DeploymentError> {
        Ok(Project::list(&self.pool).await?)
    }

    async fn delete_project(&self, project_id: Uuid) -> Result<(), DeploymentError> {
        Ok(Project::delete(&self.pool, project_id).await?)
    }

    async fn snapshot_projects(&self) -> Result<Vec<ProjectSnapshot>, DeploymentError> {
        let projects = Project::list_ready(&self.pool).await?;
        Ok(self.monitor.snapshot_all(projects, SNAPSHOT_PARALLELISM).await)
    }

    async fn create_task(&self, data: CreateTask) -> Result<Task, DeploymentError> {
        let steps = catalog::step_defs_for(data.mode);
        Ok(Task::create(&self.pool, &data, &steps).await?)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, DeploymentError> {
        Ok(Task::find_by_id(&self.pool, task_id)
            .await?
            .ok_or(relforge_db::models::task::TaskError::NotFound)?)
    }

    async fn list_tasks(&self, filter: TaskListFilter) -> Result<Vec<Task>, DeploymentError> {
        Ok(Task::list(&self.pool, &filter).await?)
    }

    async fn start_task(&self, task_id: Uuid) -> Result<Task, DeploymentError> {
        let task = Task::start(&self.pool, task_id).await?;
        self.scheduler.submit(task_id).await;
        Ok(task)
    }

    async fn pause_task(&self, task_id: Uuid) -> Result<Task, DeploymentError> {
        let task = Task::pause(&self.pool, task_id).await?;
        self.scheduler.stop(task_id).await;
        Ok(task)
    }

    async fn resume_task(&self, task_id: Uuid) -> Result<Task, DeploymentError> {
        let task = Task::resume(&self.pool, task_id).await?;
        self.scheduler.submit(task_id).await;
        Ok(task)
    }

    async fn cancel_task(&self, task_id: Uuid) -> Result<Task, DeploymentError> {
        let task = Task::cancel(&self.pool, task_id).await?;
        self.scheduler.stop(task_id).await;
        Ok(task)
    }

    async fn retry_task(&self, task_id: Uuid, from_step: Option<i64>) -> Result<Task, DeploymentError> {
        let task = Task::retry(&self.pool, task_id, from_step).await?;
        self.scheduler.submit(task_id).await;
        Ok(task)
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), DeploymentError> {
        Ok(Task::delete(&self.pool, task_id).await?)
    }

    async fn cleanup_completed_tasks(&self) -> Result<u64, DeploymentError> {
        Ok(Task::cleanup_completed(&self.pool).await?)
    }

    async fn get_config(&self) -> Result<GlobalConfig, DeploymentError> {
        Ok(GlobalConfig::get(&self.pool).await?)
    }

    async fn update_config(&self, patch: UpdateGlobalConfig) -> Result<GlobalConfig, DeploymentError> {
        Ok(GlobalConfig::update(&self.pool, &patch).await?)
    }

    async fn retry_crp_release(&self, release_id: i64) -> Result<bool, DeploymentError> {
        let config = GlobalConfig::get(&self.pool).await?;
        let token = config.require_package_service_token()?;
        Ok(self.package_service.retry_build(token, release_id).await?)
    }

    async fn delete_crp_release(&self, release_id: i64) -> Result<bool, DeploymentError> {
        let config = GlobalConfig::get(&self.pool).await?;
        let token = config.require_package_service_token()?;
        Ok(self.package_service.delete_release(token, release_id).await?)
    }
}
