//! REST API handlers for rollout management.
//!
//! Create, approve, start, pause and resume rollouts, and inspect the
//! progress of their groups.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use fleetgrid_rollout::{ApprovalRequest, GroupStrategy, NewRollout};
use fleetgrid_state::EntityId;

use crate::ApiState;
use crate::response::{ApiResponse, ApiResult, parse_tenant};

/// GET /{tenant}/rest/v1/rollouts
pub async fn list_rollouts(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.list(&tenant)?))
}

/// POST /{tenant}/rest/v1/rollouts
///
/// An invalid group layout answers 400; the rollout stays in CREATING so
/// its groups can be redefined.
pub async fn create_rollout(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(request): Json<NewRollout>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let rollout = state.rollouts.create(&tenant, &request)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(rollout)))
}

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub target_filter: String,
    pub groups: GroupStrategy,
}

/// POST /{tenant}/rest/v1/rollouts/validate
pub async fn validate_groups(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(body): Json<ValidateBody>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let validation = state
        .rollouts
        .validate_groups(&tenant, &body.target_filter, &body.groups)?;
    Ok(ApiResponse::ok(validation))
}

/// GET /{tenant}/rest/v1/rollouts/{id}
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.get(&tenant, id)?))
}

/// DELETE /{tenant}/rest/v1/rollouts/{id}
pub async fn delete_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state.rollouts.delete(&tenant, id)?;
    Ok(ApiResponse::ok("deleted"))
}

/// GET /{tenant}/rest/v1/rollouts/{id}/groups
pub async fn list_groups(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.groups(&tenant, id)?))
}

/// PUT /{tenant}/rest/v1/rollouts/{id}/groups
pub async fn redefine_groups(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(strategy): Json<GroupStrategy>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state.rollouts.redefine_groups(&tenant, id, &strategy)?,
    ))
}

/// GET /{tenant}/rest/v1/rollouts/{id}/progress
pub async fn rollout_progress(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.progress(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/rollouts/{id}/approve
pub async fn approve_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    body: Option<Json<ApprovalRequest>>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(ApiResponse::ok(state.rollouts.approve(&tenant, id, &request)?))
}

/// POST /{tenant}/rest/v1/rollouts/{id}/deny
pub async fn deny_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    body: Option<Json<ApprovalRequest>>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(ApiResponse::ok(state.rollouts.deny(&tenant, id, &request)?))
}

/// POST /{tenant}/rest/v1/rollouts/{id}/start
pub async fn start_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.start(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/rollouts/{id}/pause
pub async fn pause_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.pause(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/rollouts/{id}/resume
pub async fn resume_rollout(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.rollouts.resume(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/rollouts/{id}/triggerNextGroup
pub async fn trigger_next_group(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state.rollouts.trigger_next_group(&tenant, id)?,
    ))
}
