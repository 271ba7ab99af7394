use std::path::PathBuf;
use std::sync::Arc;

use relforge_db::models::project::Project;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use super::changelog::ChangelogService;
use super::repository::{CommitInfo, RepositoryService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project_id: uuid::Uuid,
    pub project_name: String,
    pub current_version: Option<String>,
    pub changelog_commit: Option<String>,
    pub commits_since_count: usize,
    pub commits_since: Vec<CommitInfo>,
    pub latest_commit: Option<CommitInfo>,
    pub error: Option<String>,
}

/// Fans out a snapshot pass over every `clone_state = ready` project through a
/// bounded worker pool (`min(N, 5)`), one `JoinSet` per pass.
pub struct Monitor {
    repository: Arc<RepositoryService>,
    changelog: Arc<ChangelogService>,
}

impl Monitor {
    pub fn new(repository: Arc<RepositoryService>, changelog: Arc<ChangelogService>) -> Self {
        Self {
            repository,
            changelog,
        }
    }

    pub async fn snapshot_all(&self, projects: Vec<Project>, parallelism: usize) -> Vec<ProjectSnapshot> {
        let bound = parallelism.min(5).max(1);
        let mut results = Vec::with_capacity(projects.len());
        let mut pending = projects.into_iter();
        let mut in_flight: JoinSet<ProjectSnapshot> = JoinSet::new();

        for project in pending.by_ref().take(bound) {
            self.spawn_one(&mut in_flight, project);
        }

        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(snapshot) => results.push(snapshot),
                Err(e) => tracing::error!(error = %e, "monitor task panicked"),
            }
            if let Some(project) = pending.next() {
                self.spawn_one(&mut in_flight, project);
            }
        }

        results
    }

    fn spawn_one(&self, set: &mut JoinSet<ProjectSnapshot>, project: Project) {
        let repository = self.repository.clone();
        let changelog = self.changelog.clone();
        set.spawn(async move { snapshot_one(&repository, &changelog, project).await });
    }
}

async fn snapshot_one(
    repository: &RepositoryService,
    changelog: &ChangelogService,
    project: Project,
) -> ProjectSnapshot {
    let Some(clone_path) = project.clone_path.as_ref().map(PathBuf::from) else {
        return ProjectSnapshot {
            project_id: project.id,
            project_name: project.name,
            current_version: None,
            changelog_commit: None,
            commits_since_count: 0,
            commits_since: Vec::new(),
            latest_commit: None,
            error: Some("project has no clone path".into()),
        };
    };

    let branch = project
        .review_forge_branch
        .clone()
        .or_else(|| project.mirror_forge_branch.clone())
        .unwrap_or_else(|| "main".to_string());

    let current_version = changelog.current_version(&clone_path).await.ok();
    let changelog_commit = changelog.last_touching_commit(&clone_path).await.ok();

    let latest_commit = repository.latest_commit(&clone_path, &branch).ok();

    let (commits_since_count, commits_since, error) = match &changelog_commit {
        Some(since) => match repository.commits_since(&clone_path, &branch, since) {
            Ok((count, commits)) => (count, commits, None),
            Err(e) => (0, Vec::new(), Some(e.to_string())),
        },
        None => (0, Vec::new(), None),
    };

    ProjectSnapshot {
        project_id: project.id,
        project_name: project.name,
        current_version,
        changelog_commit,
        commits_since_count,
        commits_since,
        latest_commit,
        error,
    }
}
