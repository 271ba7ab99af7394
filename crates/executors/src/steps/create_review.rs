use regex::Regex;
use relforge_db::models::task::Task;
use relforge_services::LocalToolchainError;

use crate::context::{parse_owner_repo, safe_version, StepContext, StepFuture, StepOutcome};

const BODY_TEMPLATE: &str = "Automated changelog bump, generated by the release pipeline.";

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    if !ctx.is_public_forge() {
        return StepOutcome::Skipped {
            log: Some("no public-forge URL configured".to_string()),
        };
    }

    let clone_path = ctx.clone_path();
    let Some(url) = &ctx.project.review_forge_url else {
        return StepOutcome::Failed {
            error: "project has no review_forge_url".to_string(),
        };
    };
    let Some((_, owner, repo)) = parse_owner_repo(url) else {
        return StepOutcome::Failed {
            error: format!("could not parse owner/repo from {url}"),
        };
    };

    let username = match ctx.config.require_forge_username() {
        Ok(u) => u.to_string(),
        Err(e) => return StepOutcome::Failed { error: e.to_string() },
    };

    let base_branch = ctx.branch();
    let branch_name = format!("dev-changelog-{}", safe_version(&ctx.task.version));
    let title = format!("chore: bump {} to {}", ctx.project.name, ctx.task.version);

    let result = ctx
        .local_toolchain
        .create_pull_request(
            &clone_path,
            &owner,
            &repo,
            &username,
            &branch_name,
            &base_branch,
            &title,
            BODY_TEMPLATE,
        )
        .await;

    let review_url = match result {
        Ok(url) => url,
        Err(LocalToolchainError::NonZeroExit { stderr, .. }) if stderr.contains("already exists") => {
            match extract_url(&stderr) {
                Some(url) => url,
                None => {
                    return StepOutcome::Failed {
                        error: format!("review already exists but URL could not be parsed: {stderr}"),
                    };
                }
            }
        }
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to create review: {e}"),
            };
        }
    };

    let review_number = review_url
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<i64>().ok());

    if let Err(e) = Task::set_review(
        &ctx.pool,
        ctx.task.id,
        Some(&branch_name),
        review_number,
        Some(&review_url),
        Some("open"),
    )
    .await
    {
        return StepOutcome::Failed {
            error: format!("failed to persist review info: {e}"),
        };
    }

    StepOutcome::Completed {
        log: Some(format!("review available at {review_url}")),
    }
}

fn extract_url(text: &str) -> Option<String> {
    let re = Regex::new(r"https?://\S+").expect("valid regex");
    re.find(text).map(|m| m.as_str().to_string())
}
