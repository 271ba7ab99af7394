use axum::extract::{Path, State};
use axum::response::Json;
use relforge_deployment::Deployment;
use relforge_utils::response::ApiResponse;

use crate::error::ApiError;
use crate::DeploymentState;

/// Operator remediation: re-dispatch a CRP release stuck in a failed or
/// stalled build state, without re-running the rest of the pipeline.
pub async fn retry_release(
    State(deployment): State<DeploymentState>,
    Path(release_id): Path<i64>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let accepted = deployment.retry_crp_release(release_id).await?;
    Ok(Json(ApiResponse::success(accepted)))
}

pub async fn delete_release(
    State(deployment): State<DeploymentState>,
    Path(release_id): Path<i64>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let accepted = deployment.delete_crp_release(release_id).await?;
    Ok(Json(ApiResponse::success(accepted)))
}
