use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relforge_db::models::project::Project;
use relforge_db::models::task::Task;
use relforge_db::{GlobalConfig, SqlitePool};
use relforge_services::{
    ChangelogService, InternalForgeClient, LocalToolchain, PackageServiceClient,
    RepositoryService, ReviewForgeClient,
};
use tokio_util::sync::CancellationToken;

/// Everything a step handler needs: the persisted state it reads, the
/// service handles it calls through, and the cancellation signal it must
/// observe at suspension points.
pub struct StepContext {
    pub pool: SqlitePool,
    pub project: Project,
    pub task: Task,
    pub config: GlobalConfig,
    pub repository: Arc<RepositoryService>,
    pub changelog: Arc<ChangelogService>,
    pub review_forge: Option<Arc<dyn ReviewForgeClient>>,
    pub internal_forge: Option<Arc<dyn InternalForgeClient>>,
    pub package_service: Arc<dyn PackageServiceClient>,
    pub local_toolchain: Arc<LocalToolchain>,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn clone_path(&self) -> std::path::PathBuf {
        self.project
            .clone_path
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from(&self.config.local_clone_root).join(&self.project.name))
    }

    pub fn branch(&self) -> String {
        self.project
            .review_forge_branch
            .clone()
            .or_else(|| self.project.mirror_forge_branch.clone())
            .unwrap_or_else(|| "main".to_string())
    }

    pub fn is_public_forge(&self) -> bool {
        self.project.review_forge_url.is_some()
    }

    pub fn is_internal_forge(&self) -> bool {
        self.project.mirror_forge_url.is_some()
    }
}

/// A step handler's result. The engine translates this into the persisted
/// step/task transitions (`spec.md` §4.6); handlers never touch the database
/// themselves except through `StepContext`.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed { log: Option<String> },
    Skipped { log: Option<String> },
    Failed { error: String },
    /// Cancellation observed at a suspension point; the engine stops the
    /// pipeline without marking this step failed.
    Cancelled,
}

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = StepOutcome> + Send + 'a>>;
pub type StepHandler = for<'a> fn(&'a StepContext) -> StepFuture<'a>;

/// Sanitizes a version string into a git-ref-safe branch suffix:
/// `:`, ` `, `/` all become `-`.
pub fn safe_version(version: &str) -> String {
    version.replace([':', ' ', '/'], "-")
}

/// Parses `https://host/owner/repo[.git]` into `(host, owner, repo)`.
pub fn parse_owner_repo(url: &str) -> Option<(String, String, String)> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let without_scheme = trimmed.split("://").nth(1).unwrap_or(trimmed);
    let mut parts = without_scheme.splitn(2, '/');
    let host = parts.next()?.to_string();
    let rest = parts.next()?;
    let mut rest_parts = rest.rsplitn(2, '/');
    let repo = rest_parts.next()?.to_string();
    let owner = rest_parts.next()?.to_string();
    Some((host, owner, repo))
}

/// Sleeps `seconds`, ticking once per second so the cancel token is observed
/// with at most 1s latency. Returns `true` if cancellation was observed.
pub async fn poll_sleep(cancel: &CancellationToken, seconds: u64) -> bool {
    for _ in 0..seconds {
        tokio::select! {
            _ = cancel.cancelled() => return true,
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
        }
    }
    false
}
