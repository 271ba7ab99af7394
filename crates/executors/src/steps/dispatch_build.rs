use relforge_db::models::task::Task;
use relforge_services::DEFAULT_ARCHES;

use crate::context::{StepContext, StepFuture, StepOutcome};

const MAX_CHANGELOG_TITLE_LEN: usize = 100;

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    let token = match ctx.config.require_package_service_token() {
        Ok(t) => t,
        Err(e) => return StepOutcome::Failed { error: e.to_string() },
    };
    let branch_id = match ctx.config.require_package_service_branch_id() {
        Ok(b) => b,
        Err(e) => return StepOutcome::Failed { error: e.to_string() },
    };
    let Some(topic_id) = ctx.task.topic_id.as_deref().and_then(|s| s.parse::<i64>().ok()) else {
        return StepOutcome::Failed {
            error: "task has no numeric topic_id".to_string(),
        };
    };

    let alias = ctx.project.package_service_alias();
    let branch = ctx.branch();

    let existing = match ctx
        .package_service
        .find_fuzzy_release(token, topic_id, &alias, &branch)
        .await
    {
        Ok(existing) => existing,
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to scan existing releases: {e}"),
            };
        }
    };

    let project_id = match &existing {
        Some(release) => release.project_id,
        None => match ctx.package_service.search_projects(token, &alias, branch_id).await {
            Ok(results) => results.first().map(|r| r.id).unwrap_or(0),
            Err(e) => {
                return StepOutcome::Failed {
                    error: format!("project search failed: {e}"),
                };
            }
        },
    };

    if let Some(release) = &existing {
        if let Err(e) = ctx.package_service.delete_release(token, release.id).await {
            return StepOutcome::Failed {
                error: format!("failed to delete prior release {}: {e}", release.id),
            };
        }
    }

    let clone_path = ctx.clone_path();
    let commit = match ctx.repository.latest_commit(&clone_path, &branch) {
        Ok(commit) => commit,
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to resolve latest commit: {e}"),
            };
        }
    };

    let mut changelog_title = commit.subject.clone();
    changelog_title.truncate(MAX_CHANGELOG_TITLE_LEN);

    let arches = if ctx.task.architectures.is_empty() {
        DEFAULT_ARCHES.to_string()
    } else {
        ctx.task.architectures.join(";")
    };

    let request = relforge_services::SubmitBuildRequest {
        topic_id,
        project_id,
        project_name: alias,
        branch,
        branch_id,
        commit: commit.long,
        tag: ctx.task.version.clone(),
        arches,
        changelog: changelog_title,
    };

    let result = match ctx.package_service.submit_build(token, &request).await {
        Ok(result) => result,
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("build dispatch failed: {e}"),
            };
        }
    };

    if let Err(e) = Task::set_build(
        &ctx.pool,
        ctx.task.id,
        Some(&result.build_id),
        Some("dispatched"),
        Some(&result.url),
    )
    .await
    {
        return StepOutcome::Failed {
            error: format!("failed to persist build info: {e}"),
        };
    }

    StepOutcome::Completed {
        log: Some(format!("dispatched build {} at {}", result.build_id, result.url)),
    }
}
