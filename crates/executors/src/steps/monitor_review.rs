use relforge_db::models::task::Task;
use relforge_services::ReviewForgeError;

use crate::context::{parse_owner_repo, poll_sleep, StepContext, StepFuture, StepOutcome};

const POLL_INTERVAL_SECS: u64 = 30;
const MAX_ITERATIONS: u32 = 60;

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    if !ctx.is_public_forge() {
        return StepOutcome::Skipped {
            log: Some("no public-forge URL configured".to_string()),
        };
    }

    let Some(client) = ctx.review_forge.as_ref() else {
        return StepOutcome::Failed {
            error: "no review-forge client configured".to_string(),
        };
    };
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
    let Some(number) = ctx.task.review_number else {
        return StepOutcome::Failed {
            error: "task has no review_number recorded".to_string(),
        };
    };

    for iteration in 0..MAX_ITERATIONS {
        if ctx.cancel.is_cancelled() {
            return StepOutcome::Cancelled;
        }

        match client.pull_request(&owner, &repo, number).await {
            Ok(detail) => {
                if detail.merged {
                    let merge_commit_id = detail.merge_commit_sha.clone();
                    if let Err(e) = Task::set_review(&ctx.pool, ctx.task.id, None, None, None, Some(&detail.state))
                        .await
                    {
                        return StepOutcome::Failed {
                            error: format!("failed to persist review state: {e}"),
                        };
                    }
                    if let Err(e) = Task::set_mirror(&ctx.pool, ctx.task.id, false, merge_commit_id.as_deref()).await
                    {
                        return StepOutcome::Failed {
                            error: format!("failed to persist merge commit as mirror target: {e}"),
                        };
                    }
                    return StepOutcome::Completed {
                        log: Some(format!(
                            "review merged at {}",
                            merge_commit_id.unwrap_or_default()
                        )),
                    };
                }

                if detail.state == "closed" {
                    return StepOutcome::Failed {
                        error: "review closed but not merged".to_string(),
                    };
                }

                if let Err(e) = Task::set_review(&ctx.pool, ctx.task.id, None, None, None, Some(&detail.state)).await
                {
                    tracing::warn!(error = %e, "failed to persist intermediate review state");
                }
            }
            Err(ReviewForgeError::Http(e)) if e.is_timeout() => {
                tracing::warn!(iteration, "review-forge poll timed out, retrying");
            }
            Err(e) => {
                return StepOutcome::Failed {
                    error: format!("review-forge poll failed: {e}"),
                };
            }
        }

        if poll_sleep(&ctx.cancel, POLL_INTERVAL_SECS).await {
            return StepOutcome::Cancelled;
        }
    }

    StepOutcome::Failed {
        error: format!("review not merged after {MAX_ITERATIONS} polls"),
    }
}
