use axum::extract::{Path, State};
use axum::response::Json;
use relforge_db::models::project::{CreateProject, Project};
use relforge_deployment::Deployment;
use relforge_services::ProjectSnapshot;
use relforge_utils::response::ApiResponse;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentState;

pub async fn register_project(
    State(deployment): State<DeploymentState>,
    Json(data): Json<CreateProject>,
) -> Result<Json<ApiResponse<Project>>, ApiError> {
    let project = deployment.register_project(data).await?;
    Ok(Json(ApiResponse::success(project)))
}

pub async fn list_projects(
    State(deployment): State<DeploymentState>,
) -> Result<Json<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = deployment.list_projects().await?;
    Ok(Json(ApiResponse::success(projects)))
}

pub async fn get_project(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Project>>, ApiError> {
    let project = deployment.get_project(id).await?;
    Ok(Json(ApiResponse::success(project)))
}

pub async fn delete_project(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    deployment.delete_project(id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn clone_project(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Project>>, ApiError> {
    let project = deployment.clone_project(id).await?;
    Ok(Json(ApiResponse::success(project)))
}

pub async fn snapshot_projects(
    State(deployment): State<DeploymentState>,
) -> Result<Json<ApiResponse<Vec<ProjectSnapshot>>>, ApiError> {
    let snapshots = deployment.snapshot_projects().await?;
    Ok(Json(ApiResponse::success(snapshots)))
}
