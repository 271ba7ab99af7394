use axum::extract::{Path, Query, State};
use axum::response::Json;
use relforge_db::models::task::{CreateTask, Task, TaskListFilter};
use relforge_deployment::Deployment;
use relforge_utils::response::ApiResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::DeploymentState;

pub async fn list_tasks(
    State(deployment): State<DeploymentState>,
    Query(filter): Query<TaskListFilter>,
) -> Result<Json<ApiResponse<Vec<Task>>>, ApiError> {
    let tasks = deployment.list_tasks(filter).await?;
    Ok(Json(ApiResponse::success(tasks)))
}

pub async fn create_task(
    State(deployment): State<DeploymentState>,
    Json(data): Json<CreateTask>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.create_task(data).await?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn get_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.get_task(id).await?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn start_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.start_task(id).await?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn pause_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.pause_task(id).await?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn resume_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.resume_task(id).await?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn cancel_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.cancel_task(id).await?;
    Ok(Json(ApiResponse::success(task)))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub from_step: Option<i64>,
}

pub async fn retry_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RetryRequest>,
) -> Result<Json<ApiResponse<Task>>, ApiError> {
    let task = deployment.retry_task(id, body.from_step).await?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn delete_task(
    State(deployment): State<DeploymentState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    deployment.delete_task(id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn cleanup_completed(
    State(deployment): State<DeploymentState>,
) -> Result<Json<ApiResponse<u64>>, ApiError> {
    let removed = deployment.cleanup_completed_tasks().await?;
    Ok(Json(ApiResponse::success(removed)))
}
