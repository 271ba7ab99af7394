use relforge_db::models::task::Task;

use crate::context::{StepContext, StepFuture, StepOutcome};

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    let clone_path = ctx.clone_path();
    let branch = ctx.branch();

    if let Err(e) = ctx
        .repository
        .update(ctx.config.proxy_url.as_deref(), &ctx.project, &clone_path)
        .await
    {
        return StepOutcome::Failed {
            error: format!("failed to update clone: {e}"),
        };
    }

    let head = match ctx.repository.latest_commit(&clone_path, &branch) {
        Ok(commit) => commit.long,
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to read updated head: {e}"),
            };
        }
    };

    if let Err(e) = Task::set_start_head(&ctx.pool, ctx.task.id, &head).await {
        return StepOutcome::Failed {
            error: format!("failed to persist start_head: {e}"),
        };
    }

    StepOutcome::Completed {
        log: Some(format!("pulled latest, head now {head}")),
    }
}
