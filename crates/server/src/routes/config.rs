use axum::extract::State;
use axum::response::Json;
use relforge_db::models::global_config::UpdateGlobalConfig;
use relforge_db::GlobalConfig;
use relforge_deployment::Deployment;
use relforge_utils::response::ApiResponse;

use crate::error::ApiError;
use crate::DeploymentState;

pub async fn get_config(
    State(deployment): State<DeploymentState>,
) -> Result<Json<ApiResponse<GlobalConfig>>, ApiError> {
    let config = deployment.get_config().await?;
    Ok(Json(ApiResponse::success(config)))
}

pub async fn update_config(
    State(deployment): State<DeploymentState>,
    Json(patch): Json<UpdateGlobalConfig>,
) -> Result<Json<ApiResponse<GlobalConfig>>, ApiError> {
    let config = deployment.update_config(patch).await?;
    Ok(Json(ApiResponse::success(config)))
}
