use relforge_db::models::step::StepDef;
use relforge_db::BuildMode;

use crate::context::StepHandler;
use crate::steps;

/// One pipeline entry: the row persisted by `Task::create` plus the handler
/// invoked for it.
pub struct CatalogEntry {
    pub def: StepDef,
    pub handler: StepHandler,
}

const CHECK_ENVIRONMENT: StepDef = StepDef {
    name: "check environment",
    description: "verify the clone, toolchain and forge CLIs required for this task are available",
};
const PULL_LATEST: StepDef = StepDef {
    name: "pull latest",
    description: "fast-forward the local clone to the tracked branch's remote tip",
};
const GENERATE_CHANGELOG: StepDef = StepDef {
    name: "generate changelog",
    description: "add a debian/changelog entry summarizing commits since the previous release",
};
const COMMIT: StepDef = StepDef {
    name: "commit",
    description: "commit the changelog edit on top of the latest remote tip",
};
const PUSH: StepDef = StepDef {
    name: "push",
    description: "push the changelog branch to the public fork or via the internal review tool",
};
const CREATE_REVIEW: StepDef = StepDef {
    name: "create review",
    description: "open a pull request for the changelog branch",
};
const MONITOR_REVIEW: StepDef = StepDef {
    name: "monitor review",
    description: "poll the review until it is merged or closed",
};
const WAIT_MIRROR_SYNC: StepDef = StepDef {
    name: "wait for mirror sync",
    description: "poll the internal mirror until it carries the merged commit",
};
const DISPATCH_BUILD: StepDef = StepDef {
    name: "dispatch build",
    description: "submit a new release to the package build service",
};
const MONITOR_BUILD: StepDef = StepDef {
    name: "monitor build",
    description: "record where the dispatched build can be tracked",
};

/// The ordered step list for a mode, materialized once at task-creation time
/// and handed to `Task::create`.
pub fn catalog_for(mode: BuildMode) -> Vec<CatalogEntry> {
    match mode {
        BuildMode::Normal => vec![
            CatalogEntry { def: CHECK_ENVIRONMENT, handler: steps::check_environment::run },
            CatalogEntry { def: PULL_LATEST, handler: steps::pull_latest::run },
            CatalogEntry { def: GENERATE_CHANGELOG, handler: steps::generate_changelog::run },
            CatalogEntry { def: COMMIT, handler: steps::commit::run },
            CatalogEntry { def: PUSH, handler: steps::push::run },
            CatalogEntry { def: CREATE_REVIEW, handler: steps::create_review::run },
            CatalogEntry { def: MONITOR_REVIEW, handler: steps::monitor_review::run },
            CatalogEntry { def: WAIT_MIRROR_SYNC, handler: steps::wait_mirror_sync::run },
            CatalogEntry { def: DISPATCH_BUILD, handler: steps::dispatch_build::run },
            CatalogEntry { def: MONITOR_BUILD, handler: steps::monitor_build::run },
        ],
        BuildMode::ChangelogOnly => vec![
            CatalogEntry { def: CHECK_ENVIRONMENT, handler: steps::check_environment::run },
            CatalogEntry { def: PULL_LATEST, handler: steps::pull_latest::run },
            CatalogEntry { def: GENERATE_CHANGELOG, handler: steps::generate_changelog::run },
            CatalogEntry { def: COMMIT, handler: steps::commit::run },
            CatalogEntry { def: PUSH, handler: steps::push::run },
            CatalogEntry { def: CREATE_REVIEW, handler: steps::create_review::run },
            CatalogEntry { def: MONITOR_REVIEW, handler: steps::monitor_review::run },
        ],
        BuildMode::CrpOnly => vec![
            CatalogEntry { def: CHECK_ENVIRONMENT, handler: steps::check_environment::run },
            CatalogEntry { def: DISPATCH_BUILD, handler: steps::dispatch_build::run },
            CatalogEntry { def: MONITOR_BUILD, handler: steps::monitor_build::run },
        ],
    }
}

/// Just the `StepDef`s, for `Task::create`.
pub fn step_defs_for(mode: BuildMode) -> Vec<StepDef> {
    catalog_for(mode).into_iter().map(|entry| entry.def).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crp_only_has_three_steps_in_order() {
        let defs = step_defs_for(BuildMode::CrpOnly);
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].name, "check environment");
        assert_eq!(defs[1].name, "dispatch build");
        assert_eq!(defs[2].name, "monitor build");
    }

    #[test]
    fn normal_has_ten_steps() {
        assert_eq!(step_defs_for(BuildMode::Normal).len(), 10);
    }

    #[test]
    fn changelog_only_has_seven_steps() {
        assert_eq!(step_defs_for(BuildMode::ChangelogOnly).len(), 7);
    }
}
