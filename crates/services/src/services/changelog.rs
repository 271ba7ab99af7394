use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error("changelog not found at {0}")]
    NotFound(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse changelog header")]
    Unparseable,
    #[error("commit for version {0} not found")]
    CommitNotFound(String),
    #[error("git command failed: {0}")]
    CommandFailed(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangelogInfo {
    pub version: Option<String>,
    pub package: Option<String>,
    pub distribution: Option<String>,
    pub urgency: Option<String>,
}

/// One cache slot per clone path. `fetched_at` is a single timestamp shared by
/// both `version` and `commit` — whichever is fetched last bumps it for both,
/// so the other field may be served stale past its own effective TTL. This
/// mirrors `original_source/app/services/changelog_service.py`'s cache and is
/// preserved deliberately rather than "fixed".
#[derive(Debug, Clone, Default)]
struct CacheEntry {
    version: Option<String>,
    commit: Option<String>,
    fetched_at: Option<Instant>,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|t| t.elapsed() < CACHE_TTL)
    }
}

/// Parses the Debian changelog format. Process-wide cache keyed by clone path.
pub struct ChangelogService {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl ChangelogService {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn changelog_path(clone_path: &Path) -> PathBuf {
        clone_path.join("debian").join("changelog")
    }

    pub async fn current_version(&self, clone_path: &Path) -> Result<String, ChangelogError> {
        {
            let cache = self.cache.lock().expect("changelog cache poisoned");
            if let Some(entry) = cache.get(clone_path) {
                if entry.fresh() {
                    if let Some(version) = &entry.version {
                        tracing::debug!(version = %version, "current_version cache hit");
                        return Ok(version.clone());
                    }
                }
            }
        }

        let path = Self::changelog_path(clone_path);
        if !path.exists() {
            return Err(ChangelogError::NotFound(path));
        }

        let version = match dpkg_parsechangelog_field(&path, "Version").await {
            Ok(version) => version,
            Err(_) => parse_version_from_first_line(&path).await?,
        };

        let mut cache = self.cache.lock().expect("changelog cache poisoned");
        let entry = cache.entry(clone_path.to_path_buf()).or_default();
        entry.version = Some(version.clone());
        entry.fetched_at = Some(Instant::now());

        Ok(version)
    }

    pub async fn last_touching_commit(&self, clone_path: &Path) -> Result<String, ChangelogError> {
        {
            let cache = self.cache.lock().expect("changelog cache poisoned");
            if let Some(entry) = cache.get(clone_path) {
                if entry.fresh() {
                    if let Some(commit) = &entry.commit {
                        tracing::debug!(commit = %commit, "last_touching_commit cache hit");
                        return Ok(commit.clone());
                    }
                }
            }
        }

        let path = Self::changelog_path(clone_path);
        if !path.exists() {
            return Err(ChangelogError::NotFound(path));
        }

        let output = Command::new("git")
            .current_dir(clone_path)
            .args(["log", "-1", "--format=%H", "--", "debian/changelog"])
            .output()
            .await?;

        if !output.status.success() {
            return Err(ChangelogError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Err(ChangelogError::CommitNotFound("HEAD".into()));
        }

        let mut cache = self.cache.lock().expect("changelog cache poisoned");
        let entry = cache.entry(clone_path.to_path_buf()).or_default();
        entry.commit = Some(commit.clone());
        entry.fetched_at = Some(Instant::now());

        Ok(commit)
    }

    /// Blame-based: find the commit that introduced `pkg (version) ...`,
    /// falling back to searching commit messages for `bump version to {version}`.
    pub async fn find_commit_for_version(
        &self,
        clone_path: &Path,
        version: &str,
    ) -> Result<String, ChangelogError> {
        let pattern = format!("({version})");
        let output = Command::new("git")
            .current_dir(clone_path)
            .args([
                "log",
                "--format=%H",
                "-S",
                &pattern,
                "--",
                "debian/changelog",
            ])
            .output()
            .await?;

        if output.status.success() {
            if let Some(first) = String::from_utf8_lossy(&output.stdout).lines().last() {
                let commit = first.trim();
                if !commit.is_empty() {
                    return Ok(commit.to_string());
                }
            }
        }

        let grep = format!("bump version to {version}");
        let output = Command::new("git")
            .current_dir(clone_path)
            .args(["log", "--format=%H", "--grep", &grep])
            .output()
            .await?;

        if output.status.success() {
            if let Some(first) = String::from_utf8_lossy(&output.stdout).lines().next() {
                let commit = first.trim();
                if !commit.is_empty() {
                    return Ok(commit.to_string());
                }
            }
        }

        Err(ChangelogError::CommitNotFound(version.to_string()))
    }

    pub async fn info(&self, clone_path: &Path) -> ChangelogInfo {
        let path = Self::changelog_path(clone_path);
        if !path.exists() {
            return ChangelogInfo::default();
        }

        let version = dpkg_parsechangelog_field(&path, "Version").await.ok();
        let package = dpkg_parsechangelog_field(&path, "Source").await.ok();
        let distribution = dpkg_parsechangelog_field(&path, "Distribution").await.ok();
        let urgency = dpkg_parsechangelog_field(&path, "Urgency").await.ok();

        ChangelogInfo {
            version,
            package,
            distribution,
            urgency,
        }
    }

    pub fn invalidate(&self, clone_path: &Path) {
        self.cache
            .lock()
            .expect("changelog cache poisoned")
            .remove(clone_path);
    }

    pub fn invalidate_all(&self) {
        self.cache.lock().expect("changelog cache poisoned").clear();
    }
}

impl Default for ChangelogService {
    fn default() -> Self {
        Self::new()
    }
}

async fn dpkg_parsechangelog_field(path: &Path, field: &str) -> Result<String, ChangelogError> {
    let output = Command::new("dpkg-parsechangelog")
        .args(["-l", &path.to_string_lossy(), "-S", field])
        .output()
        .await?;

    if !output.status.success() {
        return Err(ChangelogError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn parse_version_from_first_line(path: &Path) -> Result<String, ChangelogError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let first_line = contents.lines().next().unwrap_or_default();

    let re = Regex::new(r"^[^(]+\(([^)]+)\)").expect("valid regex");
    let captures = re.captures(first_line).ok_or(ChangelogError::Unparseable)?;
    Ok(captures[1].to_string())
}
