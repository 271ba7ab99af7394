use std::collections::HashMap;
use std::sync::Arc;

use relforge_db::models::task::Task;
use relforge_db::SqlitePool;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::{Engine, EngineDeps};

struct RunningTask {
    cancel: CancellationToken,
}

/// Process-wide task scheduler. Bounds concurrent executions with a
/// semaphore and tracks each live task's cancel token so `stop` can reach it.
pub struct Scheduler {
    pool: SqlitePool,
    deps: Arc<EngineDeps>,
    running: Mutex<HashMap<Uuid, RunningTask>>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, deps: Arc<EngineDeps>, max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            pool,
            deps,
            running: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        })
    }

    /// Re-submits every task left in `running` from a prior process
    /// lifetime. Steps retain their on-disk status, so the engine resumes
    /// naturally after the last completed step.
    pub async fn recover(self: &Arc<Self>) {
        let tasks = match Task::list_running(&self.pool).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "failed to enumerate running tasks on startup");
                return;
            }
        };

        for task in tasks {
            tracing::info!(task_id = %task.id, "recovering in-flight task");
            self.submit(task.id).await;
        }
    }

    /// Submits a task for execution. A no-op (with a warning) if the task id
    /// is already running.
    pub async fn submit(self: &Arc<Self>, task_id: Uuid) {
        let mut running = self.running.lock().await;
        if running.contains_key(&task_id) {
            tracing::warn!(%task_id, "task is already running, ignoring resubmission");
            return;
        }

        let cancel = CancellationToken::new();
        running.insert(task_id, RunningTask { cancel: cancel.clone() });
        drop(running);

        let scheduler = self.clone();
        let deps = self.deps.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let engine = Engine::new(deps, cancel);
            if let Err(e) = engine.run(task_id).await {
                tracing::error!(%task_id, error = %e, "task engine aborted");
            }

            scheduler.running.lock().await.remove(&task_id);
        });
    }

    /// Signals the running task's cancel token. A no-op if it is not running.
    pub async fn stop(&self, task_id: Uuid) {
        if let Some(running) = self.running.lock().await.get(&task_id) {
            running.cancel.cancel();
        }
    }

    pub async fn is_running(&self, task_id: Uuid) -> bool {
        self.running.lock().await.contains_key(&task_id)
    }
}
