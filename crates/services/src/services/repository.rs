use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use git2::{Oid, Repository};
use relforge_db::models::project::{CloneState, Project, ProjectError};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no forge URL configured for project {0}")]
    NoForgeUrl(String),
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("clone not ready: {0}")]
    NotCloned(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub short: String,
    pub long: String,
    pub subject: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Resolved clone target: which forge to use, proxy eligibility, and the branch to track.
struct CloneTarget {
    url: String,
    branch: String,
    use_proxy: bool,
}

/// Owns `{local_clone_root}/{project.name}` working trees. Mutating operations
/// (`clone`, `update`) are serialized per clone path; inspections (`latest_commit`,
/// `commits_since`, `commit_subject`) run lock-free and tolerate eventual consistency.
pub struct RepositoryService {
    locks: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
}

impl RepositoryService {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn clone_path(&self, local_clone_root: &str, project: &Project) -> PathBuf {
        Path::new(local_clone_root).join(&project.name)
    }

    /// Public forge (review) URLs take priority over the mirror, matching the
    /// `github_url > gerrit_repo_url` preference in the original repo service.
    fn resolve_target(&self, project: &Project, proxy_url: Option<&str>) -> Result<CloneTarget, RepositoryError> {
        if let Some(url) = &project.review_forge_url {
            return Ok(CloneTarget {
                url: url.clone(),
                branch: project
                    .review_forge_branch
                    .clone()
                    .unwrap_or_else(|| "main".to_string()),
                use_proxy: proxy_url.is_some(),
            });
        }
        if let Some(url) = &project.mirror_forge_url {
            return Ok(CloneTarget {
                url: url.clone(),
                branch: project
                    .mirror_forge_branch
                    .clone()
                    .unwrap_or_else(|| "main".to_string()),
                use_proxy: false,
            });
        }
        Err(RepositoryError::NoForgeUrl(project.name.clone()))
    }

    /// Destructive: removes any pre-existing tree at the clone path first.
    pub async fn clone(
        &self,
        pool: &SqlitePool,
        local_clone_root: &str,
        proxy_url: Option<&str>,
        project: &Project,
    ) -> Result<PathBuf, RepositoryError> {
        let path = self.clone_path(local_clone_root, project);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        Project::set_clone_state(pool, project.id, CloneState::Cloning, None, None).await?;

        let target = match self.resolve_target(project, proxy_url) {
            Ok(t) => t,
            Err(e) => {
                Project::set_clone_state(
                    pool,
                    project.id,
                    CloneState::Error,
                    None,
                    Some(&e.to_string()),
                )
                .await?;
                return Err(e);
            }
        };

        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut env = HashMap::new();
        if target.use_proxy {
            if let Some(proxy) = proxy_url {
                env.insert("https_proxy".to_string(), proxy.to_string());
                env.insert("http_proxy".to_string(), proxy.to_string());
            }
        }

        let result = run_git(
            Path::new("."),
            &[
                "clone",
                "--branch",
                &target.branch,
                &target.url,
                path.to_string_lossy().as_ref(),
            ],
            &env,
        )
        .await;

        match result {
            Ok(_) => {
                Project::set_clone_state(
                    pool,
                    project.id,
                    CloneState::Ready,
                    Some(path.to_string_lossy().as_ref()),
                    None,
                )
                .await?;
                tracing::info!(project = %project.name, path = %path.display(), "clone completed");
                Ok(path)
            }
            Err(e) => {
                tracing::error!(project = %project.name, error = %e, "clone failed");
                Project::set_clone_state(
                    pool,
                    project.id,
                    CloneState::Error,
                    None,
                    Some(&e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Fetch `origin`, checkout the configured branch, fast-forward. Never force-resets.
    pub async fn update(
        &self,
        proxy_url: Option<&str>,
        project: &Project,
        clone_path: &Path,
    ) -> Result<(), RepositoryError> {
        let lock = self.lock_for(clone_path);
        let _guard = lock.lock().await;

        if !clone_path.exists() {
            return Err(RepositoryError::NotCloned(project.name.clone()));
        }

        let target = self.resolve_target(project, proxy_url)?;

        let mut env = HashMap::new();
        if target.use_proxy {
            if let Some(proxy) = proxy_url {
                env.insert("https_proxy".to_string(), proxy.to_string());
                env.insert("http_proxy".to_string(), proxy.to_string());
            }
        }

        run_git(clone_path, &["fetch", "origin"], &env).await?;
        run_git(clone_path, &["checkout", &target.branch], &env).await?;
        run_git(
            clone_path,
            &["merge", "--ff-only", &format!("origin/{}", target.branch)],
            &env,
        )
        .await?;

        tracing::info!(project = %project.name, "repository updated");
        Ok(())
    }

    /// Run an arbitrary git subcommand against a clone under its advisory
    /// lock. Used by step handlers for operations this service doesn't wrap
    /// directly (branch reset, stash, commit, push, remote add, ...).
    pub async fn exec(
        &self,
        clone_path: &Path,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> Result<String, RepositoryError> {
        let lock = self.lock_for(clone_path);
        let _guard = lock.lock().await;
        run_git(clone_path, args, env).await
    }

    pub fn latest_commit(
        &self,
        clone_path: &Path,
        branch: &str,
    ) -> Result<CommitInfo, RepositoryError> {
        let repo = Repository::open(clone_path)?;
        let reference = repo.resolve_reference_from_short_name(branch)?;
        let commit = reference.peel_to_commit()?;
        Ok(commit_info(&commit))
    }

    /// Commits reachable from `branch` but not from `rev` (no merges), oldest first.
    pub fn commits_since(
        &self,
        clone_path: &Path,
        branch: &str,
        rev: &str,
    ) -> Result<(usize, Vec<CommitInfo>), RepositoryError> {
        let repo = Repository::open(clone_path)?;
        let tip = repo.resolve_reference_from_short_name(branch)?.peel_to_commit()?;
        let since = repo.revparse_single(rev)?.peel_to_commit()?;

        let mut walk = repo.revwalk()?;
        walk.push(tip.id())?;
        walk.hide(since.id())?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;

        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            if commit.parent_count() > 1 {
                continue;
            }
            commits.push(commit_info(&commit));
        }

        Ok((commits.len(), commits))
    }

    pub fn commit_subject(&self, clone_path: &Path, id: &str) -> Result<String, RepositoryError> {
        let repo = Repository::open(clone_path)?;
        let oid = Oid::from_str(id).or_else(|_| repo.revparse_single(id).map(|o| o.id()))?;
        let commit = repo.find_commit(oid)?;
        Ok(commit.summary().unwrap_or_default().to_string())
    }
}

impl Default for RepositoryService {
    fn default() -> Self {
        Self::new()
    }
}

fn commit_info(commit: &git2::Commit) -> CommitInfo {
    let long = commit.id().to_string();
    let short = long[..8.min(long.len())].to_string();
    let time = commit.time();
    let timestamp = Utc
        .timestamp_opt(time.seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now);
    CommitInfo {
        short,
        long,
        subject: commit.summary().unwrap_or_default().to_string(),
        author: commit.author().name().unwrap_or_default().to_string(),
        timestamp,
    }
}

async fn run_git(
    cwd: &Path,
    args: &[&str],
    env: &HashMap<String, String>,
) -> Result<String, RepositoryError> {
    let mut cmd = Command::new("git");
    cmd.current_dir(cwd).args(args).env_clear().envs(
        std::env::vars().chain(env.iter().map(|(k, v)| (k.clone(), v.clone()))),
    );

    let output = cmd.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(RepositoryError::CommandFailed(stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_path_joins_root_and_name() {
        let svc = RepositoryService::new();
        let project = Project {
            id: uuid::Uuid::new_v4(),
            name: "demo".into(),
            review_forge_url: None,
            review_forge_branch: None,
            mirror_forge_url: None,
            mirror_forge_branch: None,
            mirror_clone_url: None,
            package_service_alias: None,
            clone_path: None,
            clone_state: CloneState::Pending,
            clone_error: None,
            last_known_head: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let path = svc.clone_path("/var/lib/relforge/clones", &project);
        assert_eq!(path, PathBuf::from("/var/lib/relforge/clones/demo"));
    }
}
