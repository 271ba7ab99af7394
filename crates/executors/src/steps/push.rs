use std::collections::HashMap;

use crate::context::{parse_owner_repo, StepContext, StepFuture, StepOutcome};

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    let clone_path = ctx.clone_path();
    let branch_name = format!("dev-changelog-{}", crate::context::safe_version(&ctx.task.version));
    let env = HashMap::new();

    if ctx.is_public_forge() {
        let Some(url) = &ctx.project.review_forge_url else {
            return StepOutcome::Failed {
                error: "project has no review_forge_url".to_string(),
            };
        };
        let Some((host, owner, repo)) = parse_owner_repo(url) else {
            return StepOutcome::Failed {
                error: format!("could not parse owner/repo from {url}"),
            };
        };
        let username = match ctx.config.require_forge_username() {
            Ok(u) => u,
            Err(e) => return StepOutcome::Failed { error: e.to_string() },
        };

        let fork_url = format!("https://{host}/{username}/{repo}.git");

        // `remote add` is idempotent-ish: ignore failure if it already exists,
        // but make sure the URL is current either way.
        let _ = ctx
            .repository
            .exec(&clone_path, &["remote", "add", "fork", &fork_url], &env)
            .await;
        if let Err(e) = ctx
            .repository
            .exec(&clone_path, &["remote", "set-url", "fork", &fork_url], &env)
            .await
        {
            return StepOutcome::Failed {
                error: format!("failed to configure fork remote: {e}"),
            };
        }

        if let Err(e) = ctx
            .repository
            .exec(&clone_path, &["push", "--force", "fork", &branch_name], &env)
            .await
        {
            return StepOutcome::Failed {
                error: format!("failed to force-push to fork: {e}"),
            };
        }

        let _ = owner; // not needed for the push itself, kept for traceability in logs below
        return StepOutcome::Completed {
            log: Some(format!("force-pushed {branch_name} to fork/{username}/{repo}")),
        };
    }

    let branch = ctx.branch();
    match ctx.local_toolchain.review_push(&clone_path, &branch).await {
        Ok(_) => StepOutcome::Completed {
            log: Some(format!("pushed to refs/for/{branch} via review-push")),
        },
        Err(e) => StepOutcome::Failed {
            error: format!("review-push failed: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_repo_from_https_url() {
        let (host, owner, repo) = parse_owner_repo("https://pf/owner/demo").expect("parses");
        assert_eq!(host, "pf");
        assert_eq!(owner, "owner");
        assert_eq!(repo, "demo");
    }
}
