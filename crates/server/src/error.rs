use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use relforge_db::models::global_config::ConfigError;
use relforge_db::models::project::ProjectError;
use relforge_db::models::task::TaskError;
use relforge_deployment::DeploymentError;
use relforge_utils::response::ApiResponse;

/// Adapts `DeploymentError` to an HTTP status and the shared JSON envelope.
/// Route handlers return `Result<Json<ApiResponse<T>>, ApiError>`.
pub struct ApiError(DeploymentError);

impl From<DeploymentError> for ApiError {
    fn from(err: DeploymentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            DeploymentError::Task(TaskError::NotFound | TaskError::ProjectNotFound) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            DeploymentError::Task(TaskError::IllegalTransition(_, _)) => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            DeploymentError::Task(TaskError::UnsupportedMode(_)) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            DeploymentError::Project(ProjectError::NotFound) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            DeploymentError::Project(ProjectError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            DeploymentError::Config(ConfigError::MissingCredential(_)) => {
                (StatusCode::PRECONDITION_FAILED, self.0.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        tracing::error!(error = %self.0, "request failed");
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
