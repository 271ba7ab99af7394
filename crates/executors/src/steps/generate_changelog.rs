use std::collections::HashMap;

use crate::context::{safe_version, StepContext, StepFuture, StepOutcome};

pub fn run(ctx: &StepContext) -> StepFuture<'_> {
    Box::pin(run_impl(ctx))
}

async fn run_impl(ctx: &StepContext) -> StepOutcome {
    let clone_path = ctx.clone_path();
    let branch = ctx.branch();
    let version = &ctx.task.version;

    if ctx.is_public_forge() {
        let branch_name = format!("dev-changelog-{}", safe_version(version));
        let env = HashMap::new();

        if let Err(e) = ctx.repository.exec(&clone_path, &["fetch", "origin"], &env).await {
            return StepOutcome::Failed {
                error: format!("failed to fetch before resetting changelog branch: {e}"),
            };
        }
        if let Err(e) = ctx
            .repository
            .exec(
                &clone_path,
                &["checkout", "-B", &branch_name, &format!("origin/{branch}")],
                &env,
            )
            .await
        {
            return StepOutcome::Failed {
                error: format!("failed to create/reset changelog branch: {e}"),
            };
        }
        if let Err(e) = ctx.repository.exec(&clone_path, &["clean", "-fdx"], &env).await {
            return StepOutcome::Failed {
                error: format!("failed to clean working tree: {e}"),
            };
        }
    }

    let prev_rev = match resolve_previous_revision(ctx, &clone_path).await {
        Ok(rev) => rev,
        Err(e) => return StepOutcome::Failed { error: e },
    };

    let subjects = match ctx.repository.commits_since(&clone_path, &branch, &prev_rev) {
        Ok((_, commits)) if !commits.is_empty() => commits.into_iter().map(|c| c.subject).collect(),
        Ok(_) => vec![format!("Release {version}")],
        Err(e) => {
            return StepOutcome::Failed {
                error: format!("failed to enumerate commits since {prev_rev}: {e}"),
            };
        }
    };

    let Some(debemail) = ctx.config.debemail() else {
        return StepOutcome::Failed {
            error: "DEBEMAIL identity not configured (debemail_name/debemail_email)".to_string(),
        };
    };

    let subjects: Vec<String> = subjects;
    let (first, rest) = subjects.split_first().expect("subjects is never empty");

    if let Err(e) = ctx
        .local_toolchain
        .dch_new_entry(&clone_path, &debemail, version, first)
        .await
    {
        return StepOutcome::Failed {
            error: format!("dch failed on first entry: {e}"),
        };
    }

    for subject in rest {
        if let Err(e) = ctx.local_toolchain.dch_append(&clone_path, &debemail, subject).await {
            return StepOutcome::Failed {
                error: format!("dch failed appending entry: {e}"),
            };
        }
    }

    StepOutcome::Completed {
        log: Some(format!("added {} changelog entr(y/ies) for {version}", rest.len() + 1)),
    }
}

/// Previous version resolved via the changelog service, falling back to the
/// latest tag, then the repository root commit.
async fn resolve_previous_revision(ctx: &StepContext, clone_path: &std::path::Path) -> Result<String, String> {
    if let Ok(prev_version) = ctx.changelog.current_version(clone_path).await {
        if let Ok(commit) = ctx.changelog.find_commit_for_version(clone_path, &prev_version).await {
            return Ok(commit);
        }
        return Ok(prev_version);
    }

    if let Ok(tag) = ctx
        .repository
        .exec(clone_path, &["describe", "--tags", "--abbrev=0"], &HashMap::new())
        .await
    {
        let tag = tag.trim();
        if !tag.is_empty() {
            return Ok(tag.to_string());
        }
    }

    ctx.repository
        .exec(
            clone_path,
            &["rev-list", "--max-parents=0", "HEAD"],
            &HashMap::new(),
        )
        .await
        .map(|out| out.lines().next().unwrap_or_default().trim().to_string())
        .map_err(|e| format!("could not resolve a previous revision: {e}"))
}
