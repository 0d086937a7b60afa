//! fleetgrid-api — HTTP surface of FleetGrid.
//!
//! Two route families share one router: the device polling protocol under
//! `/{tenant}/controller/v1/{controller_id}` and the management API under
//! `/{tenant}/rest/v1`.
//!
//! # Device Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Poll: sleep interval and links to pending work |
//! | GET | `/deploymentBase/{action_id}` | Chunks and handling of an update |
//! | POST | `/deploymentBase/{action_id}/feedback` | Progress report |
//! | GET | `/confirmationBase/{action_id}` | Update waiting for confirmation |
//! | POST | `/confirmationBase/{action_id}/feedback` | Confirm or deny |
//! | GET | `/cancelAction/{action_id}` | Pending cancellation |
//! | POST | `/cancelAction/{action_id}/feedback` | Cancellation outcome |
//! | PUT | `/configData` | Report target attributes |
//! | GET | `/softwaremodules/{module_id}/artifacts` | Artifacts of an assigned module |
//! | GET | `/softwaremodules/{module_id}/artifacts/{filename}` | Download |
//!
//! # Management Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET, POST | `/targets` | List (`?q=` filter) or register targets |
//! | GET, PUT, DELETE | `/targets/{controller_id}` | One target |
//! | GET | `/targets/{controller_id}/actions` | Action history of a target |
//! | GET, POST | `/targets/{controller_id}/metadata` | Target metadata |
//! | PUT, DELETE | `/targets/{controller_id}/metadata/{key}` | One metadata entry |
//! | GET | `/targets/{controller_id}/autoConfirm` | Auto-confirmation state |
//! | POST | `/targets/{controller_id}/autoConfirm/activate` | Enable auto-confirmation |
//! | POST | `/targets/{controller_id}/autoConfirm/deactivate` | Disable auto-confirmation |
//! | GET, POST | `/softwaremoduletypes` | Module types |
//! | GET, DELETE | `/softwaremoduletypes/{key}` | One module type |
//! | GET, POST | `/distributionsettypes` | Set types |
//! | GET, DELETE | `/distributionsettypes/{key}` | One set type |
//! | GET, POST | `/softwaremodules` | Software modules |
//! | GET, PUT, DELETE | `/softwaremodules/{id}` | One module |
//! | GET, POST | `/softwaremodules/{id}/artifacts` | List or upload (`?filename=`) |
//! | GET, DELETE | `/softwaremodules/{id}/artifacts/{filename}` | One artifact |
//! | GET, POST | `/softwaremodules/{id}/metadata` | Module metadata |
//! | PUT, DELETE | `/softwaremodules/{id}/metadata/{key}` | One metadata entry |
//! | GET, POST | `/distributionsets` | Distribution sets |
//! | GET, PUT, DELETE | `/distributionsets/{id}` | One set |
//! | POST | `/distributionsets/{id}/modules` | Assign modules |
//! | DELETE | `/distributionsets/{id}/modules/{module_id}` | Unassign a module |
//! | GET, POST | `/distributionsets/{id}/metadata` | Set metadata |
//! | PUT, DELETE | `/distributionsets/{id}/metadata/{key}` | One metadata entry |
//! | POST | `/distributionsets/{id}/assignedTargets` | Assign the set to targets |
//! | GET | `/actions/{id}` | One action |
//! | GET | `/actions/{id}/status` | Status history |
//! | POST | `/actions/{id}/cancel` | Request cancellation |
//! | POST | `/actions/{id}/force` | Soft to forced |
//! | POST | `/actions/{id}/forcequit` | Close a canceling action |
//! | GET, POST | `/rollouts` | Rollouts |
//! | POST | `/rollouts/validate` | Dry run of a group layout |
//! | GET, DELETE | `/rollouts/{id}` | One rollout |
//! | GET, PUT | `/rollouts/{id}/groups` | Groups, or redefine while creating |
//! | GET | `/rollouts/{id}/progress` | Per-group counters |
//! | POST | `/rollouts/{id}/{approve,deny,start,pause,resume,triggerNextGroup}` | Transitions |

pub mod controller;
pub mod handlers;
pub mod response;
pub mod rollout_handlers;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};

use fleetgrid_core::{CoreContext, FleetServices};
use fleetgrid_rollout::RolloutScheduler;

pub use response::{ApiError, ApiResponse, ApiResult};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub services: FleetServices,
    pub rollouts: RolloutScheduler,
}

impl ApiState {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            services: FleetServices::new(ctx.clone()),
            rollouts: RolloutScheduler::new(ctx),
        }
    }
}

const DEVICE: &str = "/{tenant}/controller/v1/{controller_id}";
const REST: &str = "/{tenant}/rest/v1";

fn device_routes() -> Router<ApiState> {
    use controller as c;

    let p = |suffix: &str| format!("{DEVICE}{suffix}");
    Router::new()
        .route(DEVICE, get(c::poll))
        .route(&p("/deploymentBase/{action_id}"), get(c::deployment_base))
        .route(&p("/deploymentBase/{action_id}/feedback"), post(c::feedback))
        .route(&p("/confirmationBase/{action_id}"), get(c::confirmation_base))
        .route(
            &p("/confirmationBase/{action_id}/feedback"),
            post(c::confirmation_feedback),
        )
        .route(&p("/cancelAction/{action_id}"), get(c::cancel_action))
        .route(&p("/cancelAction/{action_id}/feedback"), post(c::feedback))
        .route(&p("/configData"), put(c::config_data))
        .route(
            &p("/softwaremodules/{module_id}/artifacts"),
            get(c::module_artifacts),
        )
        .route(
            &p("/softwaremodules/{module_id}/artifacts/{filename}"),
            get(c::download_artifact),
        )
}

fn management_routes() -> Router<ApiState> {
    use handlers as h;
    use rollout_handlers as r;

    let p = |suffix: &str| format!("{REST}{suffix}");
    Router::new()
        // targets
        .route(&p("/targets"), get(h::list_targets).post(h::create_target))
        .route(
            &p("/targets/{controller_id}"),
            get(h::get_target).put(h::update_target).delete(h::delete_target),
        )
        .route(&p("/targets/{controller_id}/actions"), get(h::target_actions))
        .route(
            &p("/targets/{controller_id}/metadata"),
            get(h::target_metadata).post(h::add_target_metadata),
        )
        .route(
            &p("/targets/{controller_id}/metadata/{key}"),
            put(h::update_target_metadata).delete(h::delete_target_metadata),
        )
        .route(
            &p("/targets/{controller_id}/autoConfirm"),
            get(h::auto_confirm_status),
        )
        .route(
            &p("/targets/{controller_id}/autoConfirm/activate"),
            post(h::activate_auto_confirm),
        )
        .route(
            &p("/targets/{controller_id}/autoConfirm/deactivate"),
            post(h::deactivate_auto_confirm),
        )
        // types
        .route(
            &p("/softwaremoduletypes"),
            get(h::list_module_types).post(h::create_module_type),
        )
        .route(
            &p("/softwaremoduletypes/{key}"),
            get(h::get_module_type).delete(h::delete_module_type),
        )
        .route(
            &p("/distributionsettypes"),
            get(h::list_set_types).post(h::create_set_type),
        )
        .route(
            &p("/distributionsettypes/{key}"),
            get(h::get_set_type).delete(h::delete_set_type),
        )
        // software modules
        .route(
            &p("/softwaremodules"),
            get(h::list_modules).post(h::create_module),
        )
        .route(
            &p("/softwaremodules/{id}"),
            get(h::get_module).put(h::update_module).delete(h::delete_module),
        )
        .route(
            &p("/softwaremodules/{id}/artifacts"),
            get(h::list_artifacts).post(h::upload_artifact),
        )
        .route(
            &p("/softwaremodules/{id}/artifacts/{filename}"),
            get(h::download_artifact).delete(h::delete_artifact),
        )
        .route(
            &p("/softwaremodules/{id}/metadata"),
            get(h::module_metadata).post(h::add_module_metadata),
        )
        .route(
            &p("/softwaremodules/{id}/metadata/{key}"),
            put(h::update_module_metadata).delete(h::delete_module_metadata),
        )
        // distribution sets
        .route(&p("/distributionsets"), get(h::list_sets).post(h::create_set))
        .route(
            &p("/distributionsets/{id}"),
            get(h::get_set).put(h::update_set).delete(h::delete_set),
        )
        .route(&p("/distributionsets/{id}/modules"), post(h::assign_modules))
        .route(
            &p("/distributionsets/{id}/modules/{module_id}"),
            axum::routing::delete(h::unassign_module),
        )
        .route(
            &p("/distributionsets/{id}/metadata"),
            get(h::set_metadata).post(h::add_set_metadata),
        )
        .route(
            &p("/distributionsets/{id}/metadata/{key}"),
            put(h::update_set_metadata).delete(h::delete_set_metadata),
        )
        .route(
            &p("/distributionsets/{id}/assignedTargets"),
            post(h::assign_targets),
        )
        // actions
        .route(&p("/actions/{id}"), get(h::get_action))
        .route(&p("/actions/{id}/status"), get(h::action_status))
        .route(&p("/actions/{id}/cancel"), post(h::cancel_action))
        .route(&p("/actions/{id}/force"), post(h::force_action))
        .route(&p("/actions/{id}/forcequit"), post(h::force_quit_action))
        // rollouts
        .route(
            &p("/rollouts"),
            get(r::list_rollouts).post(r::create_rollout),
        )
        .route(&p("/rollouts/validate"), post(r::validate_groups))
        .route(
            &p("/rollouts/{id}"),
            get(r::get_rollout).delete(r::delete_rollout),
        )
        .route(
            &p("/rollouts/{id}/groups"),
            get(r::list_groups).put(r::redefine_groups),
        )
        .route(&p("/rollouts/{id}/progress"), get(r::rollout_progress))
        .route(&p("/rollouts/{id}/approve"), post(r::approve_rollout))
        .route(&p("/rollouts/{id}/deny"), post(r::deny_rollout))
        .route(&p("/rollouts/{id}/start"), post(r::start_rollout))
        .route(&p("/rollouts/{id}/pause"), post(r::pause_rollout))
        .route(&p("/rollouts/{id}/resume"), post(r::resume_rollout))
        .route(
            &p("/rollouts/{id}/triggerNextGroup"),
            post(r::trigger_next_group),
        )
}

/// Build the complete API router (device protocol + management).
pub fn build_router(state: ApiState) -> Router {
    let body_limit = usize::try_from(state.services.ctx.config.quota.max_artifact_size)
        .unwrap_or(usize::MAX)
        .saturating_add(1);

    Router::new()
        .merge(device_routes())
        .merge(management_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
