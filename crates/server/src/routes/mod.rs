pub mod config;
pub mod crp;
pub mod health;
pub mod projects;
pub mod tasks;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::DeploymentState;

pub fn router(deployment: DeploymentState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/config", get(config::get_config).patch(config::update_config))
        .route(
            "/projects",
            get(projects::list_projects).post(projects::register_project),
        )
        .route("/projects/snapshot", get(projects::snapshot_projects))
        .route(
            "/projects/{id}",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route("/projects/{id}/clone", post(projects::clone_project))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/cleanup", post(tasks::cleanup_completed))
        .route("/tasks/{id}", get(tasks::get_task).delete(tasks::delete_task))
        .route("/tasks/{id}/start", post(tasks::start_task))
        .route("/tasks/{id}/pause", post(tasks::pause_task))
        .route("/tasks/{id}/resume", post(tasks::resume_task))
        .route("/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/tasks/{id}/retry", post(tasks::retry_task))
        .route("/crp/releases/{id}/retry", post(crp::retry_release))
        .route("/crp/releases/{id}", delete(crp::delete_release))
        .with_state(deployment)
}
