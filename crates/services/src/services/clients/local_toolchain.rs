use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum LocalToolchainError {
    #[error("io error launching {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: std::io::Error,
    },
    #[error("{tool} exited with status {status}: {stderr}")]
    NonZeroExit {
        tool: &'static str,
        status: i32,
        stderr: String,
    },
    #[error("required tool not found on PATH: {0}")]
    NotFound(&'static str),
}

/// Subprocess wrappers around tools the engine shells out to: `dch`,
/// `dpkg-parsechangelog` (covered by `ChangelogService`), the review-push CLI,
/// and the public-forge CLI. Every invocation gets its own explicit `env`/`cwd`
/// rather than mutating the parent process (`os.environ`/`os.chdir` in the
/// original are concurrency hazards — see the design notes this preserves
/// against).
pub struct LocalToolchain {
    dch_bin: String,
    review_push_bin: String,
    public_forge_bin: String,
}

impl LocalToolchain {
    pub fn new() -> Self {
        Self {
            dch_bin: "dch".to_string(),
            review_push_bin: "git-review".to_string(),
            public_forge_bin: "gh".to_string(),
        }
    }

    pub async fn is_available(&self, tool: &str) -> bool {
        Command::new("which")
            .arg(tool)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// `dch -v {version} -D unstable {subject}` — create a new changelog entry.
    pub async fn dch_new_entry(
        &self,
        clone_path: &Path,
        debemail: &str,
        version: &str,
        subject: &str,
    ) -> Result<(), LocalToolchainError> {
        self.run_dch(clone_path, debemail, &["-v", version, "-D", "unstable", subject])
            .await
    }

    /// `dch -a {subject}` — append to the current entry.
    pub async fn dch_append(
        &self,
        clone_path: &Path,
        debemail: &str,
        subject: &str,
    ) -> Result<(), LocalToolchainError> {
        self.run_dch(clone_path, debemail, &["-a", subject]).await
    }

    async fn run_dch(
        &self,
        clone_path: &Path,
        debemail: &str,
        args: &[&str],
    ) -> Result<(), LocalToolchainError> {
        let mut env = HashMap::new();
        env.insert("DEBEMAIL".to_string(), debemail.to_string());
        run(&self.dch_bin, clone_path, args, &env, "dch").await?;
        Ok(())
    }

    /// `{push_tool} -R {branch} -r origin` — push to the internal review branch.
    pub async fn review_push(&self, clone_path: &Path, branch: &str) -> Result<String, LocalToolchainError> {
        run(
            &self.review_push_bin,
            clone_path,
            &["-R", branch, "-r", "origin"],
            &HashMap::new(),
            "review-push",
        )
        .await
    }

    /// `{pf_tool} pr create --repo {owner}/{repo} --head {user}:{branch} --base {base} --title {t} --body {b}`
    /// Returns the PR URL on stdout.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_pull_request(
        &self,
        clone_path: &Path,
        owner: &str,
        repo: &str,
        user: &str,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, LocalToolchainError> {
        let head = format!("{user}:{branch}");
        let repo_spec = format!("{owner}/{repo}");
        let output = run(
            &self.public_forge_bin,
            clone_path,
            &[
                "pr", "create", "--repo", &repo_spec, "--head", &head, "--base", base, "--title",
                title, "--body", body,
            ],
            &HashMap::new(),
            "public-forge-cli",
        )
        .await?;
        Ok(output.trim().to_string())
    }
}

impl Default for LocalToolchain {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(
    bin: &str,
    cwd: &Path,
    args: &[&str],
    env: &HashMap<String, String>,
    tool: &'static str,
) -> Result<String, LocalToolchainError> {
    let output = Command::new(bin)
        .current_dir(cwd)
        .args(args)
        .env_clear()
        .envs(std::env::vars().chain(env.iter().map(|(k, v)| (k.clone(), v.clone()))))
        .output()
        .await
        .map_err(|source| LocalToolchainError::Spawn { tool, source })?;

    if !output.status.success() {
        return Err(LocalToolchainError::NonZeroExit {
            tool,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
