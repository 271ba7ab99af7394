use relforge_db::models::task::Task;
use relforge_services::InternalForgeError;

use crate::context::{parse_owner_repo, poll_sleep, StepContext, StepFuture, StepOutcome};

const POLL_INTERVAL_SECS: u64 = 30;
const MAX_ITERATIONS: u32 = 20;

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    if !(ctx.is_public_forge() && ctx.is_internal_forge()) {
        return StepOutcome::Skipped {
            log: Some("both forges are not configured".to_string()),
        };
    }

    let Some(internal) = ctx.internal_forge.as_ref() else {
        return StepOutcome::Failed {
            error: "no internal-forge client configured".to_string(),
        };
    };
    let Some(expected) = ctx.task.mirror_head.clone() else {
        return StepOutcome::Failed {
            error: "task has no mirror_head target, monitor review has not run yet".to_string(),
        };
    };
    let Some(mirror_url) = &ctx.project.mirror_forge_url else {
        return StepOutcome::Failed {
            error: "project has no mirror_forge_url".to_string(),
        };
    };
    let Some((_, owner, repo)) = parse_owner_repo(mirror_url) else {
        return StepOutcome::Failed {
            error: format!("could not parse owner/repo from {mirror_url}"),
        };
    };
    let project_id = format!("{owner}/{repo}");
    let branch = ctx
        .project
        .mirror_forge_branch
        .clone()
        .unwrap_or_else(|| ctx.branch());

    let expected_subject = resolve_expected_subject(ctx, &expected).await;

    for iteration in 0..MAX_ITERATIONS {
        if ctx.cancel.is_cancelled() {
            return StepOutcome::Cancelled;
        }

        match internal.branch_tip(&project_id, &branch).await {
            Ok(tip) => {
                if tip.revision == expected {
                    return complete(ctx, tip.revision).await;
                }

                if let Some(subject) = &expected_subject {
                    if let Ok(tip_subject) = internal.commit_message(&project_id, &tip.revision).await {
                        if first_line(&tip_subject.message) == *subject {
                            return complete(ctx, tip.revision).await;
                        }
                    }
                }
            }
            Err(InternalForgeError::Http(e)) if e.is_timeout() => {
                tracing::warn!(iteration, "internal-forge poll timed out, retrying");
            }
            Err(e) => {
                tracing::warn!(iteration, error = %e, "internal-forge poll failed, retrying");
            }
        }

        if poll_sleep(&ctx.cancel, POLL_INTERVAL_SECS).await {
            return StepOutcome::Cancelled;
        }
    }

    StepOutcome::Failed {
        error: format!("mirror not synchronized after {MAX_ITERATIONS} polls"),
    }
}

async fn complete(ctx: &StepContext, revision: String) -> StepOutcome {
    if let Err(e) = Task::set_mirror(&ctx.pool, ctx.task.id, true, Some(&revision)).await {
        return StepOutcome::Failed {
            error: format!("failed to persist mirror sync: {e}"),
        };
    }
    StepOutcome::Completed {
        log: Some(format!("mirror synchronized at {revision}")),
    }
}

/// The commit subject the mirror's tip is expected to carry, resolved via the
/// public forge (mirroring may rewrite commit ids but preserves the message),
/// falling back to the local clone if the forge lookup fails.
async fn resolve_expected_subject(ctx: &StepContext, expected_commit: &str) -> Option<String> {
    if let (Some(client), Some(url)) = (ctx.review_forge.as_ref(), &ctx.project.review_forge_url) {
        if let Some((_, owner, repo)) = parse_owner_repo(url) {
            if let Ok(detail) = client.commit_detail(&owner, &repo, expected_commit).await {
                return Some(first_line(&detail.commit.message));
            }
        }
    }

    ctx.repository
        .commit_subject(&ctx.clone_path(), expected_commit)
        .ok()
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}
