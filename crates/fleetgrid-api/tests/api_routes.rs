//! Router-level tests: device protocol and management endpoints driven
//! through `oneshot` requests against an in-memory store.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use fleetgrid_api::{ApiState, build_router};
use fleetgrid_core::{CoreContext, FleetConfig};
use fleetgrid_state::{ManualClock, StateStore, Tenant};

fn test_app(configure: impl FnOnce(&mut FleetConfig)) -> (Router, ApiState) {
    let mut config = FleetConfig::default();
    config.retry.base_backoff_ms = 0;
    config.retry.max_backoff_ms = 0;
    configure(&mut config);
    let store = StateStore::open_in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let state = ApiState::new(CoreContext::new(store, clock, config));
    (build_router(state.clone()), state)
}

fn test_router_with(configure: impl FnOnce(&mut FleetConfig)) -> Router {
    test_app(configure).0
}

fn test_router() -> Router {
    test_router_with(|_| {})
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Bytes) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes)
}

async fn call_json(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, bytes) = call(router, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

const REST: &str = "/default/rest/v1";
const DEVICE: &str = "/default/controller/v1";

/// Module type, set type, one module with one artifact, and a set.
/// Returns `(set_id, module_id)`.
async fn seed_catalog(router: &Router) -> (u64, u64) {
    let (status, _) = call_json(
        router,
        "POST",
        &format!("{REST}/softwaremoduletypes"),
        Some(json!({"key": "os", "name": "OS", "description": null, "max_assignments": null})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call_json(
        router,
        "POST",
        &format!("{REST}/distributionsettypes"),
        Some(json!({"key": "os_only", "name": "OS only", "description": null, "mandatory": ["os"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, module) = call_json(
        router,
        "POST",
        &format!("{REST}/softwaremodules"),
        Some(json!({
            "module_type": "os",
            "name": "firmware",
            "version": "2.0",
            "vendor": null,
            "description": null,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let module_id = module["data"]["id"].as_u64().unwrap();

    let req = Request::builder()
        .method("POST")
        .uri(format!(
            "{REST}/softwaremodules/{module_id}/artifacts?filename=image.bin"
        ))
        .body(Body::from(b"firmware-bytes".to_vec()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let (status, set) = call_json(
        router,
        "POST",
        &format!("{REST}/distributionsets"),
        Some(json!({
            "name": "firmware",
            "version": "2.0",
            "description": null,
            "set_type": "os_only",
            "modules": [module_id],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (set["data"]["id"].as_u64().unwrap(), module_id)
}

async fn assign(router: &Router, set_id: u64, targets: &[&str]) -> Vec<u64> {
    let (status, body) = call_json(
        router,
        "POST",
        &format!("{REST}/distributionsets/{set_id}/assignedTargets"),
        Some(json!({ "targets": targets })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_u64().unwrap())
        .collect()
}

async fn create_target(router: &Router, controller_id: &str) {
    let (status, _) = call_json(
        router,
        "POST",
        &format!("{REST}/targets"),
        Some(json!({"controller_id": controller_id, "name": null, "description": null})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn closed(result: &str) -> Value {
    json!({"status": {"execution": "closed", "result": {"finished": result}, "details": []}})
}

#[tokio::test]
async fn poll_registers_unknown_device() {
    let router = test_router();

    let (status, body) = call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["polling"]["sleep"], "00:05:00");
    assert!(body["_links"]["configData"]["href"].is_string());
    assert!(body["_links"].get("deploymentBase").is_none());

    let (status, body) = call_json(&router, "GET", &format!("{REST}/targets/dev-01"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["update_status"], "registered");
}

#[tokio::test]
async fn deployment_flow_from_poll_to_finished() {
    let router = test_router();
    create_target(&router, "dev-01").await;
    let (set_id, module_id) = seed_catalog(&router).await;
    let ids = assign(&router, set_id, &["dev-01"]).await;
    let action_id = ids[0];

    let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;
    let href = poll["_links"]["deploymentBase"]["href"].as_str().unwrap();
    assert_eq!(href, format!("{DEVICE}/dev-01/deploymentBase/{action_id}"));

    let (status, deployment) = call_json(&router, "GET", href, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployment["deployment"]["download"], "forced");
    assert_eq!(deployment["deployment"]["update"], "forced");
    let chunk = &deployment["deployment"]["chunks"][0];
    assert_eq!(chunk["part"], "os");
    assert_eq!(chunk["artifacts"][0]["filename"], "image.bin");
    assert_eq!(chunk["artifacts"][0]["size"], 14);

    let download = chunk["artifacts"][0]["_links"]["download"]["href"]
        .as_str()
        .unwrap();
    assert_eq!(
        download,
        format!("{DEVICE}/dev-01/softwaremodules/{module_id}/artifacts/image.bin")
    );
    let (status, bytes) = call(&router, "GET", download, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"firmware-bytes");

    let (status, _) = call_json(
        &router,
        "POST",
        &format!("{href}/feedback"),
        Some(json!({"status": {"execution": "proceeding", "details": ["downloading"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        call_json(&router, "POST", &format!("{href}/feedback"), Some(closed("success"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "finished");
    assert_eq!(body["data"]["active"], false);

    let (_, target) = call_json(&router, "GET", &format!("{REST}/targets/dev-01"), None).await;
    assert_eq!(target["data"]["installed_ds"], set_id);
    assert_eq!(target["data"]["update_status"], "in_sync");

    // Feedback on a closed action conflicts.
    let (status, _) =
        call_json(&router, "POST", &format!("{href}/feedback"), Some(closed("success"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, history) = call_json(
        &router,
        "GET",
        &format!("{REST}/actions/{action_id}/status"),
        None,
    )
    .await;
    let statuses: Vec<&str> = history["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["retrieved", "running", "finished"]);
}

#[tokio::test]
async fn foreign_action_is_not_found() {
    let router = test_router();
    create_target(&router, "dev-01").await;
    create_target(&router, "dev-02").await;
    let (set_id, _) = seed_catalog(&router).await;
    let action_id = assign(&router, set_id, &["dev-01"]).await[0];

    let (status, body) = call_json(
        &router,
        "GET",
        &format!("{DEVICE}/dev-02/deploymentBase/{action_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = call_json(
        &router,
        "POST",
        &format!("{DEVICE}/dev-02/deploymentBase/{action_id}/feedback"),
        Some(closed("success")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_id_and_wrong_verb_are_rejected() {
    let router = test_router();

    let (status, _) = call(&router, "GET", &format!("{REST}/actions/not-a-number"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "DELETE", &format!("{REST}/actions/1"), None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = call(&router, "GET", "/bad%20tenant/rest/v1/targets", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn feedback_beyond_status_quota_is_forbidden() {
    let router = test_router_with(|c| c.quota.max_status_entries_per_action = 3);
    create_target(&router, "dev-01").await;
    let (set_id, _) = seed_catalog(&router).await;
    let action_id = assign(&router, set_id, &["dev-01"]).await[0];
    let uri = format!("{DEVICE}/dev-01/deploymentBase/{action_id}/feedback");
    let proceeding = json!({"status": {"execution": "proceeding"}});

    let mut statuses = Vec::new();
    for _ in 0..5 {
        let (status, _) = call_json(&router, "POST", &uri, Some(proceeding.clone())).await;
        statuses.push(status);
    }
    assert_eq!(statuses[0], StatusCode::OK);
    assert_eq!(statuses[4], StatusCode::FORBIDDEN);

    let (_, action) = call_json(&router, "GET", &format!("{REST}/actions/{action_id}"), None).await;
    assert_eq!(action["data"]["active"], true);
}

#[tokio::test]
async fn assigned_set_is_locked() {
    let router = test_router();
    create_target(&router, "dev-01").await;
    let (set_id, _) = seed_catalog(&router).await;
    assign(&router, set_id, &["dev-01"]).await;

    let (status, body) = call_json(
        &router,
        "PUT",
        &format!("{REST}/distributionsets/{set_id}"),
        Some(json!({"version": "2.1"})),
    )
    .await;
    assert_eq!(status, StatusCode::LOCKED);
    assert!(body["error"].as_str().unwrap().contains("locked"));

    // Description stays editable.
    let (status, _) = call_json(
        &router,
        "PUT",
        &format!("{REST}/distributionsets/{set_id}"),
        Some(json!({"description": "stable channel"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cancel_is_confirmed_by_the_device() {
    let router = test_router();
    create_target(&router, "dev-01").await;
    let (set_id, _) = seed_catalog(&router).await;
    let action_id = assign(&router, set_id, &["dev-01"]).await[0];

    let (status, body) = call_json(
        &router,
        "POST",
        &format!("{REST}/actions/{action_id}/cancel?requester=ops"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "canceling");

    let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;
    let href = poll["_links"]["cancelAction"]["href"].as_str().unwrap();
    let (status, cancel) = call_json(&router, "GET", href, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancel["cancelAction"]["stopId"], action_id.to_string());

    let (status, body) = call_json(
        &router,
        "POST",
        &format!("{href}/feedback"),
        Some(json!({"status": {"execution": "canceled"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "canceled");
}

#[tokio::test]
async fn config_data_merges_attributes() {
    let router = test_router();
    call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;

    let (status, body) = call_json(
        &router,
        "PUT",
        &format!("{DEVICE}/dev-01/configData"),
        Some(json!({"data": {"hw": "rev2", "region": "eu"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hw"], "rev2");

    let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;
    assert!(poll["_links"].get("configData").is_none());

    let (_, body) = call_json(
        &router,
        "PUT",
        &format!("{DEVICE}/dev-01/configData"),
        Some(json!({"data": {"hw": ""}, "mode": "remove"})),
    )
    .await;
    assert!(body["data"].get("hw").is_none());
    assert_eq!(body["data"]["region"], "eu");
}

#[tokio::test]
async fn rollout_runs_group_by_group() {
    let (router, state) = test_app(|_| {});
    for id in ["dev-00", "dev-01", "dev-02", "dev-03"] {
        create_target(&router, id).await;
    }
    let (set_id, _) = seed_catalog(&router).await;

    let (status, validation) = call_json(
        &router,
        "POST",
        &format!("{REST}/rollouts/validate"),
        Some(json!({
            "target_filter": "controllerid==dev-*",
            "groups": {"mode": "simple", "amount": 2},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validation["data"]["total_targets"], 4);
    assert_eq!(validation["data"]["targets_per_group"], json!([2, 2]));

    let (status, created) = call_json(
        &router,
        "POST",
        &format!("{REST}/rollouts"),
        Some(json!({
            "name": "wave",
            "target_filter": "controllerid==dev-*",
            "distribution_set": set_id,
            "groups": {"mode": "simple", "amount": 2},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["data"]["status"], "ready");
    let rollout_id = created["data"]["id"].as_u64().unwrap();

    let (status, started) = call_json(
        &router,
        "POST",
        &format!("{REST}/rollouts/{rollout_id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["data"]["status"], "running");

    let (_, progress) = call_json(
        &router,
        "GET",
        &format!("{REST}/rollouts/{rollout_id}/progress"),
        None,
    )
    .await;
    let groups = progress["data"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["status"], "running");
    assert_eq!(groups[1]["status"], "scheduled");

    let (_, groups) = call_json(
        &router,
        "GET",
        &format!("{REST}/rollouts/{rollout_id}/groups"),
        None,
    )
    .await;
    assert_eq!(groups["data"].as_array().unwrap().len(), 2);

    // The last feedback of the first group completes it without waiting
    // for the sweep; the next group starts on the following pass.
    for controller in ["dev-00", "dev-01", "dev-02", "dev-03"] {
        let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/{controller}"), None).await;
        if let Some(href) = poll["_links"]["deploymentBase"]["href"].as_str() {
            let (status, _) =
                call_json(&router, "POST", &format!("{href}/feedback"), Some(closed("success")))
                    .await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    let (_, progress) = call_json(
        &router,
        "GET",
        &format!("{REST}/rollouts/{rollout_id}/progress"),
        None,
    )
    .await;
    assert_eq!(progress["data"][0]["status"], "finished");
    assert_eq!(progress["data"][1]["status"], "scheduled");

    let report = state.rollouts.sweep();
    assert_eq!(report.advanced, 1);
    let (_, progress) = call_json(
        &router,
        "GET",
        &format!("{REST}/rollouts/{rollout_id}/progress"),
        None,
    )
    .await;
    assert_eq!(progress["data"][1]["status"], "running");

    for controller in ["dev-00", "dev-01", "dev-02", "dev-03"] {
        let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/{controller}"), None).await;
        if let Some(href) = poll["_links"]["deploymentBase"]["href"].as_str() {
            call_json(&router, "POST", &format!("{href}/feedback"), Some(closed("success"))).await;
        }
    }

    let (_, rollout) = call_json(&router, "GET", &format!("{REST}/rollouts/{rollout_id}"), None).await;
    assert_eq!(rollout["data"]["status"], "finished");

    // A finished rollout is not paused.
    let (status, _) = call_json(
        &router,
        "POST",
        &format!("{REST}/rollouts/{rollout_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn feedback_pass_runs_off_the_request_worker() {
    let (router, state) = test_app(|_| {});
    create_target(&router, "dev-00").await;
    let (set_id, _) = seed_catalog(&router).await;
    let (status, created) = call_json(
        &router,
        "POST",
        &format!("{REST}/rollouts"),
        Some(json!({
            "name": "single",
            "target_filter": "controllerid==dev-*",
            "distribution_set": set_id,
            "groups": {"mode": "simple", "amount": 1},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let rollout_id = created["data"]["id"].as_u64().unwrap();
    call_json(&router, "POST", &format!("{REST}/rollouts/{rollout_id}/start"), None).await;

    let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/dev-00"), None).await;
    let href = poll["_links"]["deploymentBase"]["href"]
        .as_str()
        .unwrap()
        .to_string();

    // A pass already in flight makes the post-feedback pass skip.
    let tenant = Tenant::new("default").unwrap();
    let held = state.rollouts.locks().try_acquire(&tenant, rollout_id).unwrap();
    let (status, _) =
        call_json(&router, "POST", &format!("{href}/feedback"), Some(closed("success"))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, rollout) = call_json(&router, "GET", &format!("{REST}/rollouts/{rollout_id}"), None).await;
    assert_eq!(rollout["data"]["status"], "running");

    drop(held);
    let rollouts = state.rollouts.clone();
    let report = tokio::task::spawn_blocking(move || rollouts.sweep())
        .await
        .unwrap();
    assert_eq!(report.advanced, 1);
    let (_, rollout) = call_json(&router, "GET", &format!("{REST}/rollouts/{rollout_id}"), None).await;
    assert_eq!(rollout["data"]["status"], "finished");
}

#[tokio::test]
async fn invalid_group_layout_answers_bad_request() {
    let router = test_router();
    create_target(&router, "dev-00").await;
    let (set_id, _) = seed_catalog(&router).await;

    let (status, body) = call_json(
        &router,
        "POST",
        &format!("{REST}/rollouts"),
        Some(json!({
            "name": "too-many-groups",
            "target_filter": "controllerid==dev-*",
            "distribution_set": set_id,
            "groups": {"mode": "simple", "amount": 3},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    let rollout_id = body["data"]["rollout_id"].as_u64().unwrap();

    let (status, body) = call_json(
        &router,
        "PUT",
        &format!("{REST}/rollouts/{rollout_id}/groups"),
        Some(json!({"mode": "simple", "amount": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ready");
}

#[tokio::test]
async fn confirmation_required_until_device_confirms() {
    let router = test_router_with(|c| c.actions.user_confirmation_required = true);
    create_target(&router, "dev-01").await;
    let (set_id, _) = seed_catalog(&router).await;
    let action_id = assign(&router, set_id, &["dev-01"]).await[0];

    let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;
    let href = poll["_links"]["confirmationBase"]["href"].as_str().unwrap();
    assert!(poll["_links"].get("deploymentBase").is_none());

    let (status, confirmation) = call_json(&router, "GET", href, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmation["id"], action_id.to_string());
    assert_eq!(confirmation["autoConfirm"]["active"], false);

    let (status, body) = call_json(
        &router,
        "POST",
        &format!("{href}/feedback"),
        Some(json!({"confirmation": "confirmed", "code": null, "details": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "running");

    let (_, poll) = call_json(&router, "GET", &format!("{DEVICE}/dev-01"), None).await;
    assert!(poll["_links"]["deploymentBase"]["href"].is_string());
}

#[tokio::test]
async fn auto_confirm_releases_waiting_actions() {
    let router = test_router_with(|c| c.actions.user_confirmation_required = true);
    create_target(&router, "dev-01").await;
    let (set_id, _) = seed_catalog(&router).await;
    let action_id = assign(&router, set_id, &["dev-01"]).await[0];

    let uri = format!("{REST}/targets/dev-01/autoConfirm/activate");
    let body = json!({"initiator": "ops", "remark": "night window"});
    let (status, _) = call_json(&router, "POST", &uri, Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call_json(&router, "POST", &uri, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, action) = call_json(&router, "GET", &format!("{REST}/actions/{action_id}"), None).await;
    assert_eq!(action["data"]["status"], "running");

    let (_, state) = call_json(
        &router,
        "GET",
        &format!("{REST}/targets/dev-01/autoConfirm"),
        None,
    )
    .await;
    assert_eq!(state["data"]["active"], true);
    assert_eq!(state["data"]["status"]["initiator"], "ops");

    let (status, _) = call_json(
        &router,
        "POST",
        &format!("{REST}/targets/dev-01/autoConfirm/deactivate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
