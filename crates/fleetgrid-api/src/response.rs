//! Response envelope and error → status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use fleetgrid_core::EngineError;
use fleetgrid_rollout::RolloutError;
use fleetgrid_state::Tenant;

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Handler error, rendered as an `ApiResponse` with `success: false`.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Rollout(RolloutError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<RolloutError> for ApiError {
    fn from(e: RolloutError) -> Self {
        match e {
            RolloutError::Engine(e) => Self::Engine(e),
            other => Self::Rollout(other),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP status for an engine error.
pub fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::AlreadyExists { .. } => StatusCode::CONFLICT,
        EngineError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
        EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::ReadOnly(_) => StatusCode::LOCKED,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Engine(e) => {
                let status = status_for(&e);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %e, "request failed");
                }
                error_response(&e.to_string(), status)
            }
            Self::Rollout(e) => {
                let message = e.to_string();
                match e {
                    RolloutError::GroupValidation {
                        rollout_id,
                        validation,
                    } => (
                        StatusCode::BAD_REQUEST,
                        Json(ApiResponse {
                            success: false,
                            data: Some(serde_json::json!({
                                "rollout_id": rollout_id,
                                "validation": validation,
                            })),
                            error: Some(message),
                        }),
                    )
                        .into_response(),
                    RolloutError::Engine(e) => Self::Engine(e).into_response(),
                }
            }
        }
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Tenant from the path; malformed names are a 400.
pub fn parse_tenant(name: &str) -> ApiResult<Tenant> {
    Tenant::new(name).map_err(|e| ApiError::Engine(e.into()))
}
