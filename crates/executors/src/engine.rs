use std::sync::Arc;

use relforge_db::models::project::Project;
use relforge_db::models::step::{Step, StepStatus};
use relforge_db::models::task::Task;
use relforge_db::{GlobalConfig, SqlitePool};
use relforge_services::{
    ChangelogService, InternalForgeClient, LocalToolchain, PackageServiceClient, RepositoryService,
    ReviewForgeClient,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::{self, CatalogEntry};
use crate::context::{StepContext, StepOutcome};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Database(#[from] relforge_db::models::task::TaskError),
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
    #[error("project for task {0} not found")]
    ProjectNotFound(Uuid),
}

/// The handles a single task execution needs. Constructed once per submission
/// by the scheduler and shared across every step in the pipeline.
pub struct EngineDeps {
    pub pool: SqlitePool,
    pub repository: Arc<RepositoryService>,
    pub changelog: Arc<ChangelogService>,
    pub review_forge: Option<Arc<dyn ReviewForgeClient>>,
    pub internal_forge: Option<Arc<dyn InternalForgeClient>>,
    pub package_service: Arc<dyn PackageServiceClient>,
    pub local_toolchain: Arc<LocalToolchain>,
}

/// Drives a single task's pipeline to completion, observing the supplied
/// cancel token at every step boundary and polling sleep.
pub struct Engine {
    deps: Arc<EngineDeps>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(deps: Arc<EngineDeps>, cancel: CancellationToken) -> Self {
        Self { deps, cancel }
    }

    pub async fn run(&self, task_id: Uuid) -> Result<(), EngineError> {
        let pool = &self.deps.pool;

        let task = Task::find_by_id(pool, task_id)
            .await?
            .ok_or(EngineError::TaskNotFound(task_id))?;
        let project = Project::find_by_id(pool, task.project_id)
            .await
            .map_err(|_| EngineError::ProjectNotFound(task_id))?
            .ok_or(EngineError::ProjectNotFound(task_id))?;
        let config = GlobalConfig::get(pool).await.map_err(|_| EngineError::TaskNotFound(task_id))?;

        Task::mark_running(pool, task_id).await?;

        let entries = catalog::catalog_for(task.mode);
        let steps = Step::list_for_task(pool, task_id).await.map_err(|_| EngineError::TaskNotFound(task_id))?;

        let mut all_resolved = true;

        for (step, entry) in steps.iter().zip(entries.iter()) {
            if step.status == StepStatus::Completed || step.status == StepStatus::Skipped {
                continue;
            }

            if self.cancel.is_cancelled() {
                all_resolved = false;
                break;
            }

            // Re-read on every iteration: a step can read fields a previous
            // step in this same run just wrote (`mirror_head`, `review_number`, ...).
            let task = Task::find_by_id(pool, task_id)
                .await?
                .ok_or(EngineError::TaskNotFound(task_id))?;

            let outcome = self.run_step(pool, &project, &task, &config, step, entry).await;

            if let Err(e) = Task::set_current_step_index(pool, task_id, step.order).await {
                tracing::error!(step = step.name, error = %e, "failed to persist current_step_index");
            }

            match outcome {
                StepOutcome::Completed { .. } | StepOutcome::Skipped { .. } => {}
                StepOutcome::Failed { error } => {
                    Task::mark_failed(pool, task_id, &error).await?;
                    return Ok(());
                }
                StepOutcome::Cancelled => {
                    all_resolved = false;
                    break;
                }
            }
        }

        if all_resolved {
            Task::mark_success(pool, task_id).await?;
        }

        Ok(())
    }

    async fn run_step(
        &self,
        pool: &SqlitePool,
        project: &Project,
        task: &Task,
        config: &GlobalConfig,
        step: &Step,
        entry: &CatalogEntry,
    ) -> StepOutcome {
        if let Err(e) = Step::mark_running(pool, step.id).await {
            return StepOutcome::Failed {
                error: format!("failed to mark step running: {e}"),
            };
        }

        let ctx = StepContext {
            pool: pool.clone(),
            project: project.clone(),
            task: task.clone(),
            config: config.clone(),
            repository: self.deps.repository.clone(),
            changelog: self.deps.changelog.clone(),
            review_forge: self.deps.review_forge.clone(),
            internal_forge: self.deps.internal_forge.clone(),
            package_service: self.deps.package_service.clone(),
            local_toolchain: self.deps.local_toolchain.clone(),
            cancel: self.cancel.clone(),
        };

        let outcome = (entry.handler)(&ctx).await;

        match &outcome {
            StepOutcome::Completed { log } => {
                if let Err(e) = Step::mark_completed(pool, step.id, log.as_deref()).await {
                    tracing::error!(step = step.name, error = %e, "failed to persist step completion");
                }
            }
            StepOutcome::Skipped { log } => {
                if let Err(e) = Step::mark_skipped(pool, step.id, log.as_deref()).await {
                    tracing::error!(step = step.name, error = %e, "failed to persist step skip");
                }
            }
            StepOutcome::Failed { error } => {
                if let Err(e) = Step::mark_failed(pool, step.id, error).await {
                    tracing::error!(step = step.name, error = %e, "failed to persist step failure");
                }
            }
            StepOutcome::Cancelled => {
                if let Err(e) = Step::mark_cancelled(pool, step.id).await {
                    tracing::error!(step = step.name, error = %e, "failed to persist step cancellation");
                }
            }
        }

        outcome
    }
}
