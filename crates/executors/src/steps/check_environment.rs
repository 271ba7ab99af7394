use crate::context::{StepContext, StepFuture, StepOutcome};

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    let clone_path = ctx.clone_path();

    if !clone_path.join(".git").exists() {
        return StepOutcome::Failed {
            error: format!("clone not found at {}", clone_path.display()),
        };
    }

    if !clone_path.join("debian").join("changelog").exists() {
        return StepOutcome::Failed {
            error: "debian/changelog not found in clone".to_string(),
        };
    }

    if !ctx.local_toolchain.is_available("dch").await {
        return StepOutcome::Failed {
            error: "dch is not available on PATH".to_string(),
        };
    }

    if ctx.is_public_forge() && !ctx.local_toolchain.is_available("gh").await {
        return StepOutcome::Failed {
            error: "public-forge CLI is not available on PATH".to_string(),
        };
    }

    if ctx.is_internal_forge() && !ctx.local_toolchain.is_available("git-review").await {
        return StepOutcome::Failed {
            error: "review-push CLI is not available on PATH".to_string(),
        };
    }

    StepOutcome::Completed {
        log: Some("environment checks passed".to_string()),
    }
}
