//! Engine-level scenarios exercising the scheduler/engine/step pipeline end
//! to end against a real (in-memory) database and a real git2 working tree,
//! with the three network clients faked. Steps that shell out to external
//! tools (`dch`, `gh`, `git-review`) are pre-seeded as already `completed` so
//! these tests never depend on what is installed on the host.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relforge_db::models::global_config::UpdateGlobalConfig;
use relforge_db::models::project::{CloneState, CreateProject, Project};
use relforge_db::models::task::{CreateTask, Task, TaskError};
use relforge_db::{BuildMode, GlobalConfig, SqlitePool, Step, StepStatus, TaskStatus};
use relforge_executors::{catalog, Engine, EngineDeps, Scheduler};
use relforge_services::{
    BranchInfo, ChangelogService, CommitDetail, CommitMessage, GitilesCommit, InternalForgeClient,
    InternalForgeError, LocalToolchain, PackageServiceClient, PackageServiceError,
    ProjectSearchResult, PullRequestDetail, RepositoryService, ReviewForgeClient, ReviewForgeError,
    SubmitBuildRequest, SubmitBuildResult, TopicRelease,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.expect("in-memory pool");
    sqlx::query(include_str!("../../db/migrations/0001_init.sql"))
        .execute(&pool)
        .await
        .expect("apply schema");
    pool
}

/// A real one-commit repo with a `debian/changelog`, so `git2`-backed lookups
/// (`latest_commit`, `commit_subject`) in `dispatch_build`/`wait_mirror_sync`
/// have something real to read. No `git` binary is invoked.
fn init_git_repo(dir: &Path) -> String {
    std::fs::create_dir_all(dir.join("debian")).expect("mkdir debian");
    std::fs::write(
        dir.join("debian/changelog"),
        "demo (1.2.3) unstable; urgency=medium\n\n  * Release 1.2.3.\n\n -- D <d@x>  Mon, 01 Jan 2024 00:00:00 +0000\n",
    )
    .expect("write changelog");

    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = git2::Repository::init_opts(dir, &opts).expect("init repo");

    let mut index = repo.index().expect("index");
    index.add_path(Path::new("debian/changelog")).expect("stage changelog");
    index.write().expect("write index");
    let tree_id = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let sig = git2::Signature::now("D", "d@x").expect("signature");

    let commit_oid = repo
        .commit(Some("HEAD"), &sig, &sig, "Release 1.2.3", &tree, &[])
        .expect("commit");
    commit_oid.to_string()
}

async fn seed_project(pool: &SqlitePool, clone_dir: &Path) -> Project {
    let project = Project::create(
        pool,
        &CreateProject {
            name: "demo".into(),
            review_forge_url: Some("https://pf/owner/demo".into()),
            review_forge_branch: Some("main".into()),
            mirror_forge_url: Some("https://mf/ns/demo".into()),
            mirror_forge_branch: Some("upstream/main".into()),
            mirror_clone_url: None,
            package_service_alias: None,
        },
    )
    .await
    .expect("create project");

    Project::set_clone_state(
        pool,
        project.id,
        CloneState::Ready,
        Some(&clone_dir.to_string_lossy()),
        None,
    )
    .await
    .expect("mark cloned");

    Project::find_by_id(pool, project.id).await.expect("reload").expect("project exists")
}

async fn seed_config(pool: &SqlitePool) -> GlobalConfig {
    GlobalConfig::update(
        pool,
        &UpdateGlobalConfig {
            forge_username: Some("u".into()),
            debemail_name: Some("D".into()),
            debemail_email: Some("d@x".into()),
            package_service_token: Some("tok".into()),
            package_service_branch_id: Some(1),
            ..Default::default()
        },
    )
    .await
    .expect("seed config")
}

async fn seed_task(pool: &SqlitePool, project: &Project, mode: BuildMode, topic_id: Option<&str>) -> Task {
    Task::create(
        pool,
        &CreateTask {
            project_id: project.id,
            mode,
            version: "1.2.3".into(),
            architectures: vec!["amd64".into(), "arm64".into()],
            topic_id: topic_id.map(str::to_string),
            topic_name: None,
            start_head: None,
        },
        &catalog::step_defs_for(mode),
    )
    .await
    .expect("create task")
}

/// Marks steps `0..upto` (exclusive) `completed`, as if the engine had
/// already run them in a prior pass.
async fn complete_steps_before(pool: &SqlitePool, task_id: Uuid, upto: i64) -> Vec<Step> {
    let steps = Step::list_for_task(pool, task_id).await.expect("steps");
    for step in &steps {
        if step.order < upto {
            Step::mark_completed(pool, step.id, Some("pre-seeded for test")).await.expect("seed step");
        }
    }
    Step::list_for_task(pool, task_id).await.expect("steps")
}

struct FakeReviewForge {
    merged: StdMutex<bool>,
    merge_commit_sha: String,
    commit_message: String,
    polls: AtomicU32,
}

impl FakeReviewForge {
    fn new(merge_commit_sha: &str, commit_message: &str) -> Self {
        Self {
            merged: StdMutex::new(false),
            merge_commit_sha: merge_commit_sha.to_string(),
            commit_message: commit_message.to_string(),
            polls: AtomicU32::new(0),
        }
    }

    fn merge_now(&self) {
        *self.merged.lock().unwrap() = true;
    }
}

#[async_trait]
impl ReviewForgeClient for FakeReviewForge {
    async fn pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        _number: i64,
    ) -> Result<PullRequestDetail, ReviewForgeError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let merged = *self.merged.lock().unwrap();
        Ok(PullRequestDetail {
            state: if merged { "merged".to_string() } else { "open".to_string() },
            merged,
            mergeable_state: None,
            merge_commit_sha: merged.then(|| self.merge_commit_sha.clone()),
            merged_by: None,
            merged_at: None,
        })
    }

    async fn commit_detail(
        &self,
        _owner: &str,
        _repo: &str,
        _id: &str,
    ) -> Result<CommitDetail, ReviewForgeError> {
        Ok(CommitDetail {
            commit: CommitMessage {
                message: self.commit_message.clone(),
            },
        })
    }
}

struct FakeInternalForge {
    tip_revision: String,
    commit_message: String,
}

#[async_trait]
impl InternalForgeClient for FakeInternalForge {
    async fn branch_tip(&self, _project: &str, _branch: &str) -> Result<BranchInfo, InternalForgeError> {
        Ok(BranchInfo {
            revision: self.tip_revision.clone(),
        })
    }

    async fn commit_message(&self, _project: &str, _id: &str) -> Result<GitilesCommit, InternalForgeError> {
        Ok(GitilesCommit {
            message: self.commit_message.clone(),
        })
    }
}

struct FakePackageService {
    build_id: String,
}

#[async_trait]
impl PackageServiceClient for FakePackageService {
    async fn login(&self, _username: &str, _password: &str) -> Result<String, PackageServiceError> {
        Ok("token".to_string())
    }

    async fn current_user(&self, _token: &str) -> Result<String, PackageServiceError> {
        Ok("u".to_string())
    }

    async fn list_topic_releases(&self, _token: &str, _topic_id: i64) -> Result<Vec<TopicRelease>, PackageServiceError> {
        Ok(vec![])
    }

    async fn search_projects(
        &self,
        _token: &str,
        _name: &str,
        _branch_id: i64,
    ) -> Result<Vec<ProjectSearchResult>, PackageServiceError> {
        Ok(vec![ProjectSearchResult { id: 99, name: "demo-v25".to_string() }])
    }

    async fn submit_build(
        &self,
        _token: &str,
        _request: &SubmitBuildRequest,
    ) -> Result<SubmitBuildResult, PackageServiceError> {
        Ok(SubmitBuildResult {
            build_id: self.build_id.clone(),
            url: format!("https://crp/topics/{}", self.build_id),
        })
    }

    async fn delete_release(&self, _token: &str, _release_id: i64) -> Result<bool, PackageServiceError> {
        Ok(true)
    }

    async fn retry_build(&self, _token: &str, _release_id: i64) -> Result<bool, PackageServiceError> {
        Ok(true)
    }
}

struct Fixture {
    _temp: TempDir,
    pool: SqlitePool,
    project: Project,
    review_forge: Arc<FakeReviewForge>,
}

/// Common arrange phase: project cloned into a real one-commit repo, config
/// seeded, steps materialized for `mode`.
async fn arrange(mode: BuildMode, topic_id: Option<&str>) -> (Fixture, Task, String) {
    let temp = TempDir::new().expect("tempdir");
    let commit_oid = init_git_repo(temp.path());

    let pool = setup_pool().await;
    seed_config(&pool).await;
    let project = seed_project(&pool, temp.path()).await;
    let task = seed_task(&pool, &project, mode, topic_id).await;

    let review_forge = Arc::new(FakeReviewForge::new(&commit_oid, "Release 1.2.3"));

    let fixture = Fixture {
        _temp: temp,
        pool,
        project,
        review_forge,
    };
    (fixture, task, commit_oid)
}

fn engine_deps(
    fixture: &Fixture,
    internal_forge: Option<Arc<dyn InternalForgeClient>>,
    package_service: Arc<dyn PackageServiceClient>,
) -> Arc<EngineDeps> {
    Arc::new(EngineDeps {
        pool: fixture.pool.clone(),
        repository: Arc::new(RepositoryService::new()),
        changelog: Arc::new(ChangelogService::new()),
        review_forge: Some(fixture.review_forge.clone() as Arc<dyn ReviewForgeClient>),
        internal_forge,
        package_service,
        local_toolchain: Arc::new(LocalToolchain::new()),
    })
}

/// S1 — public-forge normal success, exercised from "create review" onward
/// (the git/tool-dependent steps before it are pre-seeded completed, exactly
/// as if a prior engine pass had produced their recorded output).
#[tokio::test]
async fn s1_normal_mode_runs_to_success() {
    let (fixture, task, commit_oid) = arrange(BuildMode::Normal, Some("42")).await;

    complete_steps_before(&fixture.pool, task.id, 6).await;
    Task::set_review(&fixture.pool, task.id, Some("dev-changelog-1.2.3"), Some(1), Some("https://pf/owner/demo/pull/1"), Some("open"))
        .await
        .expect("seed review fields");

    let package_service = Arc::new(FakePackageService { build_id: "7".to_string() });
    let internal_forge = Arc::new(FakeInternalForge {
        tip_revision: commit_oid.clone(),
        commit_message: "Release 1.2.3".to_string(),
    });
    let deps = engine_deps(&fixture, Some(internal_forge), package_service);

    fixture.review_forge.merge_now();

    let engine = Engine::new(deps, CancellationToken::new());
    engine.run(task.id).await.expect("engine run");

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.build_id.as_deref(), Some("7"));
    assert_eq!(task.mirror_head.as_deref(), Some(commit_oid.as_str()));
    assert_eq!(task.review_url.as_deref(), Some("https://pf/owner/demo/pull/1"));
    assert_eq!(task.current_step_index, 9);

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

/// S3 — cancelling while "monitor review" is polling stops the pipeline
/// within about a second and leaves every unresolved step `cancelled`,
/// matching what `Deployment::cancel_task` does in practice (bulk-cancel the
/// task row, then signal the engine's token).
#[tokio::test]
async fn s3_cancel_during_review_monitoring_is_prompt() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::Normal, Some("42")).await;
    complete_steps_before(&fixture.pool, task.id, 6).await;
    Task::set_review(&fixture.pool, task.id, Some("dev-changelog-1.2.3"), Some(1), Some("https://pf/owner/demo/pull/1"), Some("open"))
        .await
        .expect("seed review fields");
    Task::mark_running(&fixture.pool, task.id).await.expect("running");

    let package_service = Arc::new(FakePackageService { build_id: "7".to_string() });
    let deps = engine_deps(&fixture, None, package_service);

    let cancel = CancellationToken::new();
    let engine = Engine::new(deps, cancel.clone());

    let pool = fixture.pool.clone();
    let task_id = task.id;
    let run = tokio::spawn(async move { engine.run(task_id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    Task::cancel(&pool, task_id).await.expect("bulk cancel");
    cancel.cancel();

    run.await.expect("engine task joined").expect("engine run");
    assert!(started.elapsed() < Duration::from_secs(1), "cancellation should be prompt");

    let task = Task::find_by_id(&pool, task_id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Cancelled);

    let steps = Step::list_for_task(&pool, task_id).await.expect("steps");
    for step in &steps {
        if step.order < 6 {
            assert_eq!(step.status, StepStatus::Completed);
        } else {
            assert_eq!(step.status, StepStatus::Cancelled, "step {} should be cancelled", step.order);
        }
    }
}

/// S4 — the mirror's tip id differs from the merge commit, but its subject
/// matches the public forge's, so "wait for mirror sync" completes on the
/// first poll via the subject fallback.
#[tokio::test]
async fn s4_mirror_sync_completes_via_subject_fallback() {
    let (fixture, task, commit_oid) = arrange(BuildMode::Normal, Some("42")).await;
    complete_steps_before(&fixture.pool, task.id, 7).await;
    Task::set_review(&fixture.pool, task.id, Some("dev-changelog-1.2.3"), Some(1), Some("https://pf/owner/demo/pull/1"), Some("merged"))
        .await
        .expect("seed review fields");
    Task::set_mirror(&fixture.pool, task.id, false, Some(&commit_oid)).await.expect("seed mirror target");

    let package_service = Arc::new(FakePackageService { build_id: "7".to_string() });
    let internal_forge = Arc::new(FakeInternalForge {
        tip_revision: "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string(),
        commit_message: "Release 1.2.3".to_string(),
    });
    let deps = engine_deps(&fixture, Some(internal_forge), package_service);

    let engine = Engine::new(deps, CancellationToken::new());
    engine.run(task.id).await.expect("engine run");

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert!(task.mirror_synced);
    assert_eq!(task.mirror_head.as_deref(), Some("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"));

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    let wait_mirror = steps.iter().find(|s| s.order == 7).expect("wait for mirror sync step");
    assert_eq!(wait_mirror.status, StepStatus::Completed);
    assert_eq!(wait_mirror.retry_count, 0, "should complete on the first poll, no retry involved");
}

/// S5 — retrying from "dispatch build" (index 8) re-runs only the tail of
/// the pipeline; steps 0-7 stay untouched and `retry_count` increments only
/// on the steps that were reset.
#[tokio::test]
async fn s5_retry_from_dispatch_build_reruns_only_the_tail() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::Normal, Some("42")).await;
    complete_steps_before(&fixture.pool, task.id, 8).await;
    Task::set_review(&fixture.pool, task.id, Some("dev-changelog-1.2.3"), Some(1), Some("https://pf/owner/demo/pull/1"), Some("merged"))
        .await
        .expect("seed review fields");
    Task::set_mirror(&fixture.pool, task.id, true, Some("aaa")).await.expect("seed mirror synced");

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    let dispatch_step = steps.iter().find(|s| s.order == 8).expect("dispatch build step");
    Step::mark_failed(&fixture.pool, dispatch_step.id, "CRP down").await.expect("fail dispatch");
    Task::mark_failed(&fixture.pool, task.id, "CRP down").await.expect("fail task");

    Task::retry(&fixture.pool, task.id, Some(8)).await.expect("retry");

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    for step in &steps {
        if step.order < 8 {
            assert_eq!(step.status, StepStatus::Completed);
            assert_eq!(step.retry_count, 0);
        } else {
            assert_eq!(step.status, StepStatus::Pending);
            assert_eq!(step.retry_count, 1);
        }
    }

    let package_service = Arc::new(FakePackageService { build_id: "9".to_string() });
    let internal_forge = Arc::new(FakeInternalForge {
        tip_revision: "aaa".to_string(),
        commit_message: "Release 1.2.3".to_string(),
    });
    let deps = engine_deps(&fixture, Some(internal_forge), package_service);

    let engine = Engine::new(deps, CancellationToken::new());
    engine.run(task.id).await.expect("engine run");

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.build_id.as_deref(), Some("9"));
}

/// S6 — `changelog_only` mode materializes exactly seven steps and reaches
/// `success` once the review merges, with no build steps ever created.
#[tokio::test]
async fn s6_changelog_only_mode_stops_after_monitor_review() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::ChangelogOnly, None).await;

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    assert_eq!(steps.len(), 7);
    assert!(steps.iter().all(|s| s.name != "dispatch build" && s.name != "monitor build"));

    complete_steps_before(&fixture.pool, task.id, 6).await;
    Task::set_review(&fixture.pool, task.id, Some("dev-changelog-0.5.0"), Some(1), Some("https://pf/owner/demo/pull/1"), Some("open"))
        .await
        .expect("seed review fields");

    let package_service = Arc::new(FakePackageService { build_id: "unused".to_string() });
    let deps = engine_deps(&fixture, None, package_service);

    fixture.review_forge.merge_now();

    let engine = Engine::new(deps, CancellationToken::new());
    engine.run(task.id).await.expect("engine run");

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.build_id.is_none());
}

/// Invariant 5/idempotence — resubmitting a task id the scheduler already
/// has running is a no-op; the running-task map does not grow.
#[tokio::test]
async fn resubmitting_a_running_task_does_not_grow_the_scheduler_map() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::CrpOnly, Some("42")).await;
    complete_steps_before(&fixture.pool, task.id, 1).await;
    Task::mark_running(&fixture.pool, task.id).await.expect("running");

    let package_service = Arc::new(FakePackageService { build_id: "7".to_string() });
    let deps = engine_deps(&fixture, None, package_service);
    let scheduler = Scheduler::new(fixture.pool.clone(), deps, 3);

    scheduler.submit(task.id).await;
    assert!(scheduler.is_running(task.id).await);

    scheduler.submit(task.id).await;
    assert!(scheduler.is_running(task.id).await, "still exactly one running entry");

    for _ in 0..100 {
        if !scheduler.is_running(task.id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!scheduler.is_running(task.id).await, "scheduler entry removed on completion");

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Success);
}

/// Invariant 6 — running a task whose steps are all already `completed`
/// changes no step status and still sets `status = success`.
#[tokio::test]
async fn rerunning_a_fully_completed_task_is_a_status_only_no_op() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::CrpOnly, Some("42")).await;
    let steps = complete_steps_before(&fixture.pool, task.id, 3).await;
    let logs_before: Vec<Option<String>> = steps.iter().map(|s| s.log.clone()).collect();

    let package_service = Arc::new(FakePackageService { build_id: "unused".to_string() });
    let deps = engine_deps(&fixture, None, package_service);
    let engine = Engine::new(deps, CancellationToken::new());
    engine.run(task.id).await.expect("engine run");

    let steps_after = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    let logs_after: Vec<Option<String>> = steps_after.iter().map(|s| s.log.clone()).collect();
    assert_eq!(logs_before, logs_after, "no step log should change");
    assert!(steps_after.iter().all(|s| s.status == StepStatus::Completed));

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Success);
}

/// Invariant 9 — pause then resume leaves the task exactly where it was,
/// with no step's `retry_count` touched (distinguishing it from `retry`).
#[tokio::test]
async fn pause_then_resume_preserves_retry_counts() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::CrpOnly, Some("42")).await;
    complete_steps_before(&fixture.pool, task.id, 1).await;
    Task::mark_running(&fixture.pool, task.id).await.expect("running");

    let paused = Task::pause(&fixture.pool, task.id).await.expect("pause");
    assert_eq!(paused.status, TaskStatus::Paused);

    let resumed = Task::resume(&fixture.pool, task.id).await.expect("resume");
    assert_eq!(resumed.status, TaskStatus::Pending);

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    assert!(steps.iter().all(|s| s.retry_count == 0));
}

/// Invariant 10 / process restart — a task left `running` with completed
/// steps resumes at the first unresolved step and does not replay completed
/// ones, mirroring `Scheduler::recover`.
#[tokio::test]
async fn recovering_a_running_task_resumes_without_replaying_completed_steps() {
    let (fixture, task, _commit_oid) = arrange(BuildMode::CrpOnly, Some("42")).await;
    complete_steps_before(&fixture.pool, task.id, 2).await;
    Task::set_build(&fixture.pool, task.id, Some("3"), Some("dispatched"), Some("https://crp/topics/3"))
        .await
        .expect("seed build fields dispatch build would have set");
    Task::mark_running(&fixture.pool, task.id).await.expect("running");

    let package_service = Arc::new(FakePackageService { build_id: "unused".to_string() });
    let deps = engine_deps(&fixture, None, package_service);
    let scheduler = Scheduler::new(fixture.pool.clone(), deps, 3);

    scheduler.recover().await;

    for _ in 0..100 {
        if !scheduler.is_running(task.id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let task = Task::find_by_id(&fixture.pool, task.id).await.expect("load").expect("task");
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.build_id.as_deref(), Some("3"));

    let steps = Step::list_for_task(&fixture.pool, task.id).await.expect("steps");
    assert_eq!(steps[0].log.as_deref(), Some("pre-seeded for test"));
}

/// Unsupported modes are rejected at parse time, not silently coerced.
#[tokio::test]
async fn unsupported_build_mode_string_is_rejected() {
    use std::str::FromStr;
    let err = BuildMode::from_str("bogus").unwrap_err();
    assert!(matches!(err, TaskError::UnsupportedMode(m) if m == "bogus"));
}
