//! Device-facing polling protocol.
//!
//! Devices poll their base resource, follow the link to their oldest
//! active action and report progress through feedback. Resources are plain
//! JSON documents with `_links`, not wrapped in [`ApiResponse`].

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use fleetgrid_core::actions::{
    ConfirmationFeedback, DeploymentView, ExecutionPhase, Feedback, FeedbackResult,
};
use fleetgrid_core::registry::AttributeUpdateMode;
use fleetgrid_state::{Action, ActionStatus, Artifact, EntityId, Tenant};

use crate::ApiState;
use crate::response::{ApiResponse, ApiResult, parse_tenant};

fn base_href(tenant: &Tenant, controller_id: &str) -> String {
    format!("/{tenant}/controller/v1/{controller_id}")
}

fn link(href: String) -> Value {
    json!({ "href": href })
}

/// Seconds as `HH:MM:SS`.
fn sleep_string(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// GET /{tenant}/controller/v1/{controller_id}
pub async fn poll(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let view = state.services.actions.poll(&tenant, &controller_id)?;
    let base = base_href(&tenant, &controller_id);

    let mut links = serde_json::Map::new();
    if let Some(action) = &view.action {
        let (rel, path) = match action.status {
            ActionStatus::Canceling => ("cancelAction", "cancelAction"),
            ActionStatus::WaitForConfirmation => ("confirmationBase", "confirmationBase"),
            _ => ("deploymentBase", "deploymentBase"),
        };
        links.insert(rel.into(), link(format!("{base}/{path}/{}", action.id)));
    }
    if view.target.attributes.is_empty() {
        links.insert("configData".into(), link(format!("{base}/configData")));
    }

    Ok(Json(json!({
        "config": { "polling": { "sleep": sleep_string(view.sleep_secs) } },
        "_links": links,
    })))
}

fn chunks_json(tenant: &Tenant, controller_id: &str, view: &DeploymentView) -> Value {
    let base = base_href(tenant, controller_id);
    let chunks: Vec<Value> = view
        .chunks
        .iter()
        .map(|chunk| {
            let artifacts: Vec<Value> = chunk
                .artifacts
                .iter()
                .map(|a| artifact_json(&base, chunk.module_id, a))
                .collect();
            json!({
                "part": chunk.part,
                "name": chunk.name,
                "version": chunk.version,
                "artifacts": artifacts,
            })
        })
        .collect();
    json!({
        "download": view.handling.download,
        "update": view.handling.update,
        "chunks": chunks,
    })
}

fn artifact_json(base: &str, module_id: EntityId, artifact: &Artifact) -> Value {
    json!({
        "filename": artifact.filename,
        "hashes": { "sha256": artifact.sha256 },
        "size": artifact.size,
        "_links": {
            "download": link(format!(
                "{base}/softwaremodules/{module_id}/artifacts/{}",
                artifact.filename
            )),
        },
    })
}

/// GET /{tenant}/controller/v1/{controller_id}/deploymentBase/{action_id}
pub async fn deployment_base(
    State(state): State<ApiState>,
    Path((tenant, controller_id, action_id)): Path<(String, String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let view = state
        .services
        .actions
        .deployment_base(&tenant, &controller_id, action_id)?;
    Ok(Json(json!({
        "id": view.action.id.to_string(),
        "deployment": chunks_json(&tenant, &controller_id, &view),
    })))
}

/// GET /{tenant}/controller/v1/{controller_id}/confirmationBase/{action_id}
pub async fn confirmation_base(
    State(state): State<ApiState>,
    Path((tenant, controller_id, action_id)): Path<(String, String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let view = state
        .services
        .actions
        .confirmation_base(&tenant, &controller_id, action_id)?;
    let auto = state.services.confirmation.status(&tenant, &controller_id)?;
    Ok(Json(json!({
        "id": view.action.id.to_string(),
        "confirmation": chunks_json(&tenant, &controller_id, &view),
        "autoConfirm": { "active": auto.is_some() },
    })))
}

/// GET /{tenant}/controller/v1/{controller_id}/cancelAction/{action_id}
pub async fn cancel_action(
    State(state): State<ApiState>,
    Path((tenant, controller_id, action_id)): Path<(String, String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let action = state
        .services
        .actions
        .cancel_view(&tenant, &controller_id, action_id)?;
    Ok(Json(json!({
        "id": action.id.to_string(),
        "cancelAction": { "stopId": action.id.to_string() },
    })))
}

/// Feedback document as sent by devices.
#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub status: FeedbackStatus,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackStatus {
    pub execution: ExecutionPhase,
    #[serde(default)]
    pub result: Option<FeedbackResultBody>,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackResultBody {
    pub finished: FeedbackResult,
}

impl From<FeedbackBody> for Feedback {
    fn from(body: FeedbackBody) -> Self {
        Self {
            execution: body.status.execution,
            result: body.status.result.map(|r| r.finished),
            messages: body.status.details,
        }
    }
}

/// POST …/deploymentBase/{action_id}/feedback and …/cancelAction/{action_id}/feedback
///
/// A terminal outcome on a rollout action runs an advancement pass for
/// that rollout right away, on the blocking pool.
pub async fn feedback(
    State(state): State<ApiState>,
    Path((tenant, controller_id, action_id)): Path<(String, String, EntityId)>,
    Json(body): Json<FeedbackBody>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let outcome = state.services.actions.ingest_feedback(
        &tenant,
        &controller_id,
        action_id,
        &Feedback::from(body),
    )?;
    if let (true, Some(group)) = (outcome.terminal, outcome.rollout) {
        let rollouts = state.rollouts.clone();
        let rollout_tenant = tenant.clone();
        let pass = tokio::task::spawn_blocking(move || {
            rollouts.advance(&rollout_tenant, group.rollout_id)
        })
        .await;
        match pass {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(
                %tenant,
                rollout_id = group.rollout_id,
                error = %e,
                "advancement after feedback failed"
            ),
            Err(e) => warn!(
                %tenant,
                rollout_id = group.rollout_id,
                error = %e,
                "advancement task after feedback failed"
            ),
        }
    }
    Ok(ApiResponse::ok(outcome.action))
}

/// POST …/confirmationBase/{action_id}/feedback
pub async fn confirmation_feedback(
    State(state): State<ApiState>,
    Path((tenant, controller_id, action_id)): Path<(String, String, EntityId)>,
    Json(body): Json<ConfirmationFeedback>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let action: Action = state
        .services
        .actions
        .confirm(&tenant, &controller_id, action_id, &body)?;
    Ok(ApiResponse::ok(action))
}

/// Attributes reported by a device.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigDataBody {
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub mode: AttributeUpdateMode,
}

/// PUT /{tenant}/controller/v1/{controller_id}/configData
pub async fn config_data(
    State(state): State<ApiState>,
    Path((tenant, controller_id)): Path<(String, String)>,
    Json(body): Json<ConfigDataBody>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let target =
        state
            .services
            .targets
            .update_attributes(&tenant, &controller_id, &body.data, body.mode)?;
    Ok(ApiResponse::ok(target.attributes))
}

/// GET …/softwaremodules/{module_id}/artifacts
pub async fn module_artifacts(
    State(state): State<ApiState>,
    Path((tenant, controller_id, module_id)): Path<(String, String, EntityId)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let artifacts = state
        .services
        .actions
        .module_artifacts(&tenant, &controller_id, module_id)?;
    let base = base_href(&tenant, &controller_id);
    let body: Vec<Value> = artifacts
        .iter()
        .map(|a| artifact_json(&base, module_id, a))
        .collect();
    Ok(Json(body))
}

/// GET …/softwaremodules/{module_id}/artifacts/{filename}
pub async fn download_artifact(
    State(state): State<ApiState>,
    Path((tenant, controller_id, module_id, filename)): Path<(String, String, EntityId, String)>,
) -> ApiResult<impl IntoResponse> {
    let tenant = parse_tenant(&tenant)?;
    let (artifact, content) =
        state
            .services
            .actions
            .artifact_download(&tenant, &controller_id, module_id, &filename)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.filename),
            ),
            (header::ETAG, format!("\"{}\"", artifact.sha256)),
        ],
        content,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_string() {
        assert_eq!(sleep_string(300), "00:05:00");
        assert_eq!(sleep_string(3661), "01:01:01");
    }

    #[test]
    fn test_feedback_body_maps_to_core_feedback() {
        let body: FeedbackBody = serde_json::from_str(
            r#"{"status":{"execution":"closed","result":{"finished":"success"},"details":["ok"]}}"#,
        )
        .unwrap();
        let feedback = Feedback::from(body);
        assert_eq!(feedback.execution, ExecutionPhase::Closed);
        assert_eq!(feedback.result, Some(FeedbackResult::Success));
        assert_eq!(feedback.messages, vec!["ok"]);

        let body: FeedbackBody =
            serde_json::from_str(r#"{"status":{"execution":"proceeding"}}"#).unwrap();
        let feedback = Feedback::from(body);
        assert!(feedback.result.is_none());
        assert!(feedback.messages.is_empty());
    }
}
