use crate::context::{StepContext, StepFuture, StepOutcome};

/// Terminal no-op: the CRP package service has no public status-polling
/// endpoint this pipeline can lean on, so the step simply records where the
/// build can be tracked. A polling loop analogous to `monitor_review` can be
/// added once such an endpoint exists.
pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    match &ctx.task.build_url {
        Some(url) => StepOutcome::Completed {
            log: Some(format!("build dispatched, track progress at {url}")),
        },
        None => StepOutcome::Failed {
            error: "task has no build_url, dispatch build has not run".to_string(),
        },
    }
}
