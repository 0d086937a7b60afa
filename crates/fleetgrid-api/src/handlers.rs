//! Management API handlers: targets, catalog and actions.
//!
//! Each handler resolves the tenant from the path, calls one core service
//! and wraps the result in [`ApiResponse`].

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use fleetgrid_core::catalog::{
    ArtifactUpload, DistributionSetUpdate, ModuleUpdate, NewDistributionSet, NewModule,
    NewModuleType, NewSetType,
};
use fleetgrid_core::confirmation::ActivateAutoConfirm;
use fleetgrid_core::metadata::MetadataEntry;
use fleetgrid_core::registry::{NewTarget, TargetUpdate};
use fleetgrid_state::{ActionType, EntityId};

use crate::ApiState;
use crate::response::{ApiResponse, ApiResult, parse_tenant};

// ── Targets ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Target filter expression.
    pub q: Option<String>,
}

/// GET /{tenant}/rest/v1/targets
pub async fn list_targets(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let targets = state.services.targets.list(&tenant, query.q.as_deref())?;
    Ok(ApiResponse::ok(targets))
}

/// POST /{tenant}/rest/v1/targets
pub async fn create_target(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(new): Json<NewTarget>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let target = state.services.targets.create(&tenant, &new)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(target)))
}

/// GET /{tenant}/rest/v1/targets/{controller_id}
pub async fn get_target(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.targets.get(&tenant, &controller_id)?))
}

/// PUT /{tenant}/rest/v1/targets/{controller_id}
pub async fn update_target(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
    Json(update): Json<TargetUpdate>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let target = state
        .services
        .targets
        .update(&tenant, &controller_id, &update)?;
    Ok(ApiResponse::ok(target))
}

/// DELETE /{tenant}/rest/v1/targets/{controller_id}
pub async fn delete_target(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state.services.targets.delete(&tenant, &controller_id)?;
    Ok(ApiResponse::ok("deleted"))
}

/// GET /{tenant}/rest/v1/targets/{controller_id}/actions
pub async fn target_actions(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let actions = state
        .services
        .actions
        .target_actions(&tenant, &controller_id)?;
    Ok(ApiResponse::ok(actions))
}

/// GET /{tenant}/rest/v1/targets/{controller_id}/metadata
pub async fn target_metadata(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state.services.targets.metadata(&tenant, &controller_id)?,
    ))
}

/// POST /{tenant}/rest/v1/targets/{controller_id}/metadata
pub async fn add_target_metadata(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
    Json(entries): Json<Vec<MetadataEntry>>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .targets
        .add_metadata(&tenant, &controller_id, &entries)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(all)))
}

#[derive(Debug, Deserialize)]
pub struct MetadataValue {
    pub value: String,
}

/// PUT /{tenant}/rest/v1/targets/{controller_id}/metadata/{key}
pub async fn update_target_metadata(
    State(state): State<ApiState>,
    Path((tenant, controller_id, key)): Path<(String, String, String)>,
    Json(body): Json<MetadataValue>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .targets
        .update_metadata(&tenant, &controller_id, &key, &body.value)?;
    Ok(ApiResponse::ok(all))
}

/// DELETE /{tenant}/rest/v1/targets/{controller_id}/metadata/{key}
pub async fn delete_target_metadata(
    State(state): State<ApiState>,
    Path((tenant, controller_id, key)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .targets
        .delete_metadata(&tenant, &controller_id, &key)?;
    Ok(ApiResponse::ok(all))
}

/// GET /{tenant}/rest/v1/targets/{controller_id}/autoConfirm
pub async fn auto_confirm_status(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let status = state.services.confirmation.status(&tenant, &controller_id)?;
    Ok(ApiResponse::ok(serde_json::json!({
        "active": status.is_some(),
        "status": status,
    })))
}

/// POST /{tenant}/rest/v1/targets/{controller_id}/autoConfirm/activate
pub async fn activate_auto_confirm(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
    Json(request): Json<ActivateAutoConfirm>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let status = state
        .services
        .confirmation
        .activate(&tenant, &controller_id, &request)?;
    Ok(ApiResponse::ok(status))
}

/// POST /{tenant}/rest/v1/targets/{controller_id}/autoConfirm/deactivate
pub async fn deactivate_auto_confirm(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state
        .services
        .confirmation
        .deactivate(&tenant, &controller_id)?;
    Ok(ApiResponse::ok("deactivated"))
}

// ── Types ──────────────────────────────────────────────────────

/// GET /{tenant}/rest/v1/softwaremoduletypes
pub async fn list_module_types(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.module_types(&tenant)?))
}

/// POST /{tenant}/rest/v1/softwaremoduletypes
pub async fn create_module_type(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(new): Json<NewModuleType>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let created = state.services.catalog.create_module_type(&tenant, &new)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

/// GET /{tenant}/rest/v1/softwaremoduletypes/{key}
pub async fn get_module_type(
    State(state): State<ApiState>,
    Path((tenant, key)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.module_type(&tenant, &key)?))
}

/// DELETE /{tenant}/rest/v1/softwaremoduletypes/{key}
pub async fn delete_module_type(
    State(state): State<ApiState>,
    Path((tenant, key)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state.services.catalog.delete_module_type(&tenant, &key)?;
    Ok(ApiResponse::ok("deleted"))
}

/// GET /{tenant}/rest/v1/distributionsettypes
pub async fn list_set_types(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.set_types(&tenant)?))
}

/// POST /{tenant}/rest/v1/distributionsettypes
pub async fn create_set_type(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(new): Json<NewSetType>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let created = state.services.catalog.create_set_type(&tenant, &new)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)))
}

/// GET /{tenant}/rest/v1/distributionsettypes/{key}
pub async fn get_set_type(
    State(state): State<ApiState>,
    Path((tenant, key)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.set_type(&tenant, &key)?))
}

/// DELETE /{tenant}/rest/v1/distributionsettypes/{key}
pub async fn delete_set_type(
    State(state): State<ApiState>,
    Path((tenant, key)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state.services.catalog.delete_set_type(&tenant, &key)?;
    Ok(ApiResponse::ok("deleted"))
}

// ── Software modules ───────────────────────────────────────────

/// GET /{tenant}/rest/v1/softwaremodules
pub async fn list_modules(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.modules(&tenant)?))
}

/// POST /{tenant}/rest/v1/softwaremodules
pub async fn create_module(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(new): Json<NewModule>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let module = state.services.catalog.create_module(&tenant, &new)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(module)))
}

/// GET /{tenant}/rest/v1/softwaremodules/{id}
pub async fn get_module(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.module(&tenant, id)?))
}

/// PUT /{tenant}/rest/v1/softwaremodules/{id}
pub async fn update_module(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(update): Json<ModuleUpdate>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state.services.catalog.update_module(&tenant, id, &update)?,
    ))
}

/// DELETE /{tenant}/rest/v1/softwaremodules/{id}
pub async fn delete_module(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state.services.catalog.delete_module(&tenant, id)?;
    Ok(ApiResponse::ok("deleted"))
}

/// GET /{tenant}/rest/v1/softwaremodules/{id}/artifacts
pub async fn list_artifacts(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.artifacts(&tenant, id)?))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub sha256: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
}

/// POST /{tenant}/rest/v1/softwaremodules/{id}/artifacts?filename=…
///
/// The request body is the raw artifact content.
pub async fn upload_artifact(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let artifact = state.services.catalog.upload_artifact(
        &tenant,
        id,
        ArtifactUpload {
            filename: &query.filename,
            content: &body,
            sha256: query.sha256.as_deref(),
            overwrite: query.overwrite,
        },
    )?;
    Ok((StatusCode::CREATED, ApiResponse::ok(artifact)))
}

/// GET /{tenant}/rest/v1/softwaremodules/{id}/artifacts/{filename}
pub async fn download_artifact(
    State(state): State<ApiState>,
    Path((tenant, id, filename)): Path<(String, EntityId, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let (_, content) = state
        .services
        .catalog
        .artifact_content(&tenant, id, &filename)?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
        content,
    ))
}

/// DELETE /{tenant}/rest/v1/softwaremodules/{id}/artifacts/{filename}
pub async fn delete_artifact(
    State(state): State<ApiState>,
    Path((tenant, id, filename)): Path<(String, EntityId, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state
        .services
        .catalog
        .delete_artifact(&tenant, id, &filename)?;
    Ok(ApiResponse::ok("deleted"))
}

/// GET /{tenant}/rest/v1/softwaremodules/{id}/metadata
pub async fn module_metadata(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.module_metadata(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/softwaremodules/{id}/metadata
pub async fn add_module_metadata(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(entries): Json<Vec<MetadataEntry>>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .catalog
        .add_module_metadata(&tenant, id, &entries)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(all)))
}

/// PUT /{tenant}/rest/v1/softwaremodules/{id}/metadata/{key}
pub async fn update_module_metadata(
    State(state): State<ApiState>,
    Path((tenant, id, key)): Path<(String, EntityId, String)>,
    Json(body): Json<MetadataValue>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .catalog
        .update_module_metadata(&tenant, id, &key, &body.value)?;
    Ok(ApiResponse::ok(all))
}

/// DELETE /{tenant}/rest/v1/softwaremodules/{id}/metadata/{key}
pub async fn delete_module_metadata(
    State(state): State<ApiState>,
    Path((tenant, id, key)): Path<(String, EntityId, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .catalog
        .delete_module_metadata(&tenant, id, &key)?;
    Ok(ApiResponse::ok(all))
}

// ── Distribution sets ──────────────────────────────────────────

/// GET /{tenant}/rest/v1/distributionsets
pub async fn list_sets(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.sets(&tenant)?))
}

/// POST /{tenant}/rest/v1/distributionsets
pub async fn create_set(
    State(state): State<ApiState>,
    Path(tenant): Path<String>,
    Json(new): Json<NewDistributionSet>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let set = state.services.catalog.create_set(&tenant, &new)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(set)))
}

/// GET /{tenant}/rest/v1/distributionsets/{id}
pub async fn get_set(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.set(&tenant, id)?))
}

/// PUT /{tenant}/rest/v1/distributionsets/{id}
pub async fn update_set(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(update): Json<DistributionSetUpdate>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state.services.catalog.update_set(&tenant, id, &update)?,
    ))
}

/// DELETE /{tenant}/rest/v1/distributionsets/{id}
pub async fn delete_set(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    state.services.catalog.delete_set(&tenant, id)?;
    Ok(ApiResponse::ok("deleted"))
}

#[derive(Debug, Deserialize)]
pub struct ModuleIds {
    pub modules: Vec<EntityId>,
}

/// POST /{tenant}/rest/v1/distributionsets/{id}/modules
pub async fn assign_modules(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(body): Json<ModuleIds>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state
            .services
            .catalog
            .assign_modules(&tenant, id, &body.modules)?,
    ))
}

/// DELETE /{tenant}/rest/v1/distributionsets/{id}/modules/{module_id}
pub async fn unassign_module(
    State(state): State<ApiState>,
    Path((tenant, id, module_id)): Path<(String, EntityId, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state
            .services
            .catalog
            .unassign_module(&tenant, id, module_id)?,
    ))
}

/// GET /{tenant}/rest/v1/distributionsets/{id}/metadata
pub async fn set_metadata(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.catalog.set_metadata(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/distributionsets/{id}/metadata
pub async fn add_set_metadata(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(entries): Json<Vec<MetadataEntry>>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .catalog
        .add_set_metadata(&tenant, id, &entries)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(all)))
}

/// PUT /{tenant}/rest/v1/distributionsets/{id}/metadata/{key}
pub async fn update_set_metadata(
    State(state): State<ApiState>,
    Path((tenant, id, key)): Path<(String, EntityId, String)>,
    Json(body): Json<MetadataValue>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .catalog
        .update_set_metadata(&tenant, id, &key, &body.value)?;
    Ok(ApiResponse::ok(all))
}

/// DELETE /{tenant}/rest/v1/distributionsets/{id}/metadata/{key}
pub async fn delete_set_metadata(
    State(state): State<ApiState>,
    Path((tenant, id, key)): Path<(String, EntityId, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let all = state
        .services
        .catalog
        .delete_set_metadata(&tenant, id, &key)?;
    Ok(ApiResponse::ok(all))
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub targets: Vec<String>,
    #[serde(default = "forced")]
    pub action_type: ActionType,
    #[serde(default)]
    pub forced_time: Option<u64>,
}

fn forced() -> ActionType {
    ActionType::Forced
}

/// POST /{tenant}/rest/v1/distributionsets/{id}/assignedTargets
pub async fn assign_targets(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Json(body): Json<AssignBody>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let actions = state.services.actions.assign_many(
        &tenant,
        id,
        body.action_type,
        body.forced_time,
        &body.targets,
    )?;
    Ok((StatusCode::CREATED, ApiResponse::ok(actions)))
}

// ── Actions ────────────────────────────────────────────────────

/// GET /{tenant}/rest/v1/actions/{id}
pub async fn get_action(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.actions.action(&tenant, id)?))
}

/// GET /{tenant}/rest/v1/actions/{id}/status
pub async fn action_status(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(
        state.services.actions.status_history(&tenant, id)?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub requester: Option<String>,
}

/// POST /{tenant}/rest/v1/actions/{id}/cancel
pub async fn cancel_action(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
    Query(query): Query<CancelQuery>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let action = state
        .services
        .actions
        .cancel(&tenant, id, query.requester.as_deref())?;
    Ok(ApiResponse::ok(action))
}

/// POST /{tenant}/rest/v1/actions/{id}/forcequit
pub async fn force_quit_action(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.actions.force_quit(&tenant, id)?))
}

/// POST /{tenant}/rest/v1/actions/{id}/force
pub async fn force_action(
    State(state): State<ApiState>,
    Path((tenant, id)): Path<(String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    Ok(ApiResponse::ok(state.services.actions.force(&tenant, id)?))
}
