//! Action Engine — assignment, the action state machine and the device
//! feedback protocol.
//!
//! ```text
//! RUNNING | WAIT_FOR_CONFIRMATION ──closed+success──▶ FINISHED
//!         │                       ──closed+failure──▶ ERROR
//!         └──cancel──▶ CANCELING ──canceled / forceQuit──▶ CANCELED
//! ```
//!
//! Non-terminal device phases only append history rows. Terminal actions
//! are inactive and accept no further feedback, which makes duplicate or
//! late delivery harmless.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleetgrid_state::tables::{ACTIONS_BY_GROUP, ACTIONS_BY_TARGET};
use fleetgrid_state::{
    Action, ActionStatus, ActionStatusEntry, ActionType, Artifact, Audit, EntityId, GroupRef,
    Reader, Target, Tenant, WriteTxn,
};

use crate::catalog::{artifact_content_in, lock_assignable_set_in, module_in, set_in};
use crate::confirmation::auto_confirm_in;
use crate::context::CoreContext;
use crate::error::{EngineError, EngineResult};
use crate::quota;
use crate::registry::{refresh_status_in, target_in, touch_poll_in};

/// Assign one distribution set to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub controller_id: String,
    pub distribution_set: EntityId,
    pub action_type: ActionType,
    /// Epoch ms; required for `TimeForced`.
    pub forced_time: Option<u64>,
}

/// Execution phase reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPhase {
    Closed,
    Proceeding,
    Scheduled,
    Resumed,
    Canceled,
    Rejected,
    Download,
    Downloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackResult {
    Success,
    Failure,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub execution: ExecutionPhase,
    #[serde(default)]
    pub result: Option<FeedbackResult>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Result of accepted feedback.
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub action: Action,
    /// Rollout group to re-evaluate, if the action belongs to one.
    pub rollout: Option<GroupRef>,
    pub terminal: bool,
}

/// Effective handling the device should apply to a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlingMode {
    Forced,
    Attempt,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handling {
    pub download: HandlingMode,
    pub update: HandlingMode,
}

/// Handling modes of an action at time `now`.
pub fn handling_for(action: &Action, now: u64) -> Handling {
    let (download, update) = match action.action_type {
        ActionType::Forced => (HandlingMode::Forced, HandlingMode::Forced),
        ActionType::Soft => (HandlingMode::Attempt, HandlingMode::Attempt),
        ActionType::TimeForced if action.forced_time.is_some_and(|t| now >= t) => {
            (HandlingMode::Forced, HandlingMode::Forced)
        }
        ActionType::TimeForced => (HandlingMode::Attempt, HandlingMode::Attempt),
        ActionType::DownloadOnly => (HandlingMode::Forced, HandlingMode::Skip),
    };
    Handling { download, update }
}

/// One software module of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Module type key.
    pub part: String,
    pub module_id: EntityId,
    pub name: String,
    pub version: String,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone)]
pub struct DeploymentView {
    pub action: Action,
    pub handling: Handling,
    pub chunks: Vec<Chunk>,
}

/// What a polling device learns: its record and the action it should work on.
#[derive(Debug, Clone)]
pub struct PollView {
    pub target: Target,
    /// Oldest active action.
    pub action: Option<Action>,
    pub sleep_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    Confirmed,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationFeedback {
    pub confirmation: Confirmation,
    pub code: Option<i32>,
    #[serde(default)]
    pub details: Vec<String>,
}

pub fn action_in(r: &impl Reader, tenant: &Tenant, id: EntityId) -> EngineResult<Action> {
    r.get::<Action>(&Action::key_for(tenant, id))?
        .ok_or_else(|| EngineError::not_found("action", id))
}

/// An action that exists and belongs to `controller_id`.
pub fn owned_action_in(
    r: &impl Reader,
    tenant: &Tenant,
    controller_id: &str,
    id: EntityId,
) -> EngineResult<Action> {
    target_in(r, tenant, controller_id)?;
    match r.get::<Action>(&Action::key_for(tenant, id))? {
        Some(action) if action.controller_id == controller_id => Ok(action),
        _ => Err(EngineError::not_found("action", id)),
    }
}

/// A target's actions in creation order.
pub fn target_actions_in(
    r: &impl Reader,
    tenant: &Tenant,
    controller_id: &str,
) -> EngineResult<Vec<Action>> {
    let ids = r.index_ids(
        ACTIONS_BY_TARGET,
        &Action::target_index_prefix(tenant, controller_id),
    )?;
    ids.into_iter().map(|id| action_in(r, tenant, id)).collect()
}

/// Actions created for a rollout group, in creation order.
pub fn group_actions_in(
    r: &impl Reader,
    tenant: &Tenant,
    group_id: EntityId,
) -> EngineResult<Vec<Action>> {
    let ids = r.index_ids(ACTIONS_BY_GROUP, &Action::group_index_prefix(tenant, group_id))?;
    ids.into_iter().map(|id| action_in(r, tenant, id)).collect()
}

/// Append a history row without quota checks (system-originated rows).
pub fn append_status_in(
    txn: &WriteTxn,
    tenant: &Tenant,
    action_id: EntityId,
    status: ActionStatus,
    messages: Vec<String>,
    now: u64,
) -> EngineResult<ActionStatusEntry> {
    let entry = ActionStatusEntry {
        tenant: tenant.clone(),
        action_id,
        id: txn.next_id(tenant, "action_status")?,
        status,
        messages,
        occurred_at: now,
    };
    txn.put(&entry)?;
    Ok(entry)
}

/// Where feedback leads an action.
enum Transition {
    /// History row only; `status` unchanged.
    Annotate(ActionStatus),
    /// Close the action; `install` sets the target's installed set.
    Close { status: ActionStatus, install: bool },
}

fn transition_for(action: &Action, feedback: &Feedback) -> EngineResult<Transition> {
    let download_only = action.action_type == ActionType::DownloadOnly;
    let transition = match feedback.execution {
        ExecutionPhase::Closed => match feedback.result {
            Some(FeedbackResult::Success) => Transition::Close {
                status: ActionStatus::Finished,
                install: !download_only,
            },
            Some(FeedbackResult::Failure) => Transition::Close {
                status: ActionStatus::Error,
                install: false,
            },
            _ => {
                return Err(EngineError::Validation(
                    "closed feedback requires a success or failure result".into(),
                ));
            }
        },
        ExecutionPhase::Canceled if action.status == ActionStatus::Canceling => Transition::Close {
            status: ActionStatus::Canceled,
            install: false,
        },
        ExecutionPhase::Canceled | ExecutionPhase::Rejected => {
            Transition::Annotate(ActionStatus::Warning)
        }
        ExecutionPhase::Proceeding | ExecutionPhase::Resumed => {
            Transition::Annotate(ActionStatus::Running)
        }
        ExecutionPhase::Scheduled => Transition::Annotate(ActionStatus::Scheduled),
        ExecutionPhase::Download => Transition::Annotate(ActionStatus::Download),
        ExecutionPhase::Downloaded if download_only => Transition::Close {
            status: ActionStatus::Finished,
            install: false,
        },
        ExecutionPhase::Downloaded => Transition::Annotate(ActionStatus::Downloaded),
    };
    Ok(transition)
}

/// Move an action to a terminal status and recompute its target.
fn close_in(
    txn: &WriteTxn,
    action: &mut Action,
    status: ActionStatus,
    install: bool,
    now: u64,
) -> EngineResult<()> {
    action.status = status;
    action.active = false;
    action.audit.touch(now);
    txn.update(action)?;

    let mut target = target_in(txn, &action.tenant, &action.controller_id)?;
    target.last_outcome = Some(status);
    if install {
        target.installed_ds = Some(action.distribution_set);
        target.installed_at = Some(now);
    } else if status != ActionStatus::Error {
        // Canceled or download-only: nothing new got installed.
        target.assigned_ds = target.installed_ds;
    }
    target.audit.touch(now);
    refresh_status_in(txn, &mut target)?;
    txn.update(&mut target)?;
    info!(
        tenant = %action.tenant,
        controller_id = %action.controller_id,
        action_id = action.id,
        status = ?status,
        target_status = ?target.update_status,
        "action closed"
    );
    Ok(())
}

#[derive(Clone)]
pub struct ActionEngine {
    ctx: CoreContext,
}

impl ActionEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    // ── Assignment ─────────────────────────────────────────────────

    pub fn assign(&self, tenant: &Tenant, request: &AssignRequest) -> EngineResult<Action> {
        let now = self.ctx.now();
        self.ctx
            .write("assign", |txn| self.assign_in(txn, tenant, request, None, now))
    }

    /// Assign one set to many targets, all or nothing.
    pub fn assign_many(
        &self,
        tenant: &Tenant,
        distribution_set: EntityId,
        action_type: ActionType,
        forced_time: Option<u64>,
        controller_ids: &[String],
    ) -> EngineResult<Vec<Action>> {
        let unique: BTreeSet<&String> = controller_ids.iter().collect();
        quota::check_and_reserve(
            "targets per assignment",
            &format!("distribution set {distribution_set}"),
            0,
            unique.len(),
            self.ctx.config.quota.max_targets_per_assignment,
        )?;
        let now = self.ctx.now();
        let actions = self.ctx.write("assign_many", |txn| {
            unique
                .iter()
                .map(|controller_id| {
                    let request = AssignRequest {
                        controller_id: (*controller_id).clone(),
                        distribution_set,
                        action_type,
                        forced_time,
                    };
                    self.assign_in(txn, tenant, &request, None, now)
                })
                .collect::<EngineResult<Vec<_>>>()
        })?;
        info!(%tenant, distribution_set, targets = actions.len(), "distribution set assigned");
        Ok(actions)
    }

    /// Create an action inside a caller's transaction.
    ///
    /// Earlier active actions of the target stay active; the new one is
    /// queued behind them.
    pub fn assign_in(
        &self,
        txn: &WriteTxn,
        tenant: &Tenant,
        request: &AssignRequest,
        group: Option<GroupRef>,
        now: u64,
    ) -> EngineResult<Action> {
        if request.action_type == ActionType::TimeForced && request.forced_time.is_none() {
            return Err(EngineError::Validation(
                "time-forced assignment requires a forced time".into(),
            ));
        }
        let mut target = target_in(txn, tenant, &request.controller_id)?;
        let set = lock_assignable_set_in(txn, tenant, request.distribution_set, now)?;

        if let Some(limit) = self.ctx.config.quota.max_active_actions_per_target {
            let active = target_actions_in(txn, tenant, &target.controller_id)?
                .iter()
                .filter(|a| a.active)
                .count();
            quota::check_and_reserve("active actions", &target.controller_id, active, 1, limit)?;
        }

        let status = if self.ctx.config.actions.user_confirmation_required {
            ActionStatus::WaitForConfirmation
        } else {
            ActionStatus::Running
        };
        let mut action = Action {
            tenant: tenant.clone(),
            id: txn.next_id(tenant, "action")?,
            controller_id: target.controller_id.clone(),
            distribution_set: set.id,
            action_type: request.action_type,
            forced_time: match request.action_type {
                ActionType::TimeForced => request.forced_time,
                _ => None,
            },
            status,
            active: true,
            rollout_group: group,
            retrieved: false,
            audit: Audit::new(now),
        };
        txn.insert(&mut action)?;
        txn.index_put(ACTIONS_BY_TARGET, &action.target_index_key(), action.id)?;
        if let Some(key) = action.group_index_key() {
            txn.index_put(ACTIONS_BY_GROUP, &key, action.id)?;
        }

        if let (ActionStatus::WaitForConfirmation, Some(auto)) =
            (action.status, target.auto_confirm.clone())
        {
            auto_confirm_in(txn, &mut action, &auto, now)?;
        }

        target.last_outcome = None;
        target.audit.touch(now);
        refresh_status_in(txn, &mut target)?;
        txn.update(&mut target)?;
        debug!(
            %tenant,
            controller_id = %action.controller_id,
            action_id = action.id,
            distribution_set = set.id,
            action_type = ?action.action_type,
            status = ?action.status,
            "action created"
        );
        Ok(action)
    }

    // ── Operator transitions ───────────────────────────────────────

    /// Request cancellation; the device confirms it through feedback.
    pub fn cancel(
        &self,
        tenant: &Tenant,
        id: EntityId,
        requester: Option<&str>,
    ) -> EngineResult<Action> {
        let now = self.ctx.now();
        let action = self.ctx.write("cancel_action", |txn| {
            let mut action = action_in(txn, tenant, id)?;
            if !action.active || action.status == ActionStatus::Canceling {
                return Err(EngineError::InvalidState(format!(
                    "action {id} cannot be canceled in status {:?}",
                    action.status
                )));
            }
            action.status = ActionStatus::Canceling;
            action.audit.touch(now);
            txn.update(&mut action)?;
            let message = match requester {
                Some(who) => format!("cancellation requested by {who}"),
                None => "cancellation requested".to_string(),
            };
            append_status_in(txn, tenant, id, ActionStatus::Canceling, vec![message], now)?;
            Ok(action)
        })?;
        info!(%tenant, action_id = id, controller_id = %action.controller_id, "action canceling");
        Ok(action)
    }

    /// Close a canceling action without waiting for the device.
    pub fn force_quit(&self, tenant: &Tenant, id: EntityId) -> EngineResult<Action> {
        let now = self.ctx.now();
        self.ctx.write("force_quit_action", |txn| {
            let mut action = action_in(txn, tenant, id)?;
            if !action.active || action.status != ActionStatus::Canceling {
                return Err(EngineError::InvalidState(format!(
                    "action {id} is not canceling"
                )));
            }
            append_status_in(
                txn,
                tenant,
                id,
                ActionStatus::Canceled,
                vec!["force quit by operator".to_string()],
                now,
            )?;
            close_in(txn, &mut action, ActionStatus::Canceled, false, now)?;
            Ok(action)
        })
    }

    /// Escalate a soft or time-forced action to forced.
    pub fn force(&self, tenant: &Tenant, id: EntityId) -> EngineResult<Action> {
        let now = self.ctx.now();
        self.ctx.write("force_action", |txn| {
            let mut action = action_in(txn, tenant, id)?;
            match action.action_type {
                ActionType::Forced => return Ok(action),
                ActionType::DownloadOnly => {
                    return Err(EngineError::InvalidState(format!(
                        "download-only action {id} cannot be forced"
                    )));
                }
                ActionType::Soft | ActionType::TimeForced => {}
            }
            if !action.active {
                return Err(EngineError::InvalidState(format!("action {id} is closed")));
            }
            action.action_type = ActionType::Forced;
            action.forced_time = None;
            action.audit.touch(now);
            txn.update(&mut action)?;
            info!(%tenant, action_id = id, "action forced");
            Ok(action)
        })
    }

    // ── Device protocol ────────────────────────────────────────────

    /// Apply device feedback to an owned, active action.
    pub fn ingest_feedback(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        id: EntityId,
        feedback: &Feedback,
    ) -> EngineResult<FeedbackOutcome> {
        let now = self.ctx.now();
        let quotas = &self.ctx.config.quota;
        let outcome = self.ctx.write("ingest_feedback", |txn| {
            let mut action = owned_action_in(txn, tenant, controller_id, id)?;
            if !action.active {
                return Err(EngineError::InvalidState(format!(
                    "action {id} is already closed"
                )));
            }
            let transition = transition_for(&action, feedback)?;
            let parent = format!("action {id}");
            quota::check_and_reserve(
                "messages per status",
                &parent,
                0,
                feedback.messages.len(),
                quotas.max_messages_per_status,
            )?;
            let recorded =
                txn.count::<ActionStatusEntry>(&ActionStatusEntry::prefix_for(tenant, id))?;
            quota::check_and_reserve(
                "status entries",
                &parent,
                recorded,
                1,
                quotas.max_status_entries_per_action,
            )?;

            let terminal = match transition {
                Transition::Annotate(status) => {
                    append_status_in(txn, tenant, id, status, feedback.messages.clone(), now)?;
                    let mut target = target_in(txn, tenant, controller_id)?;
                    target.last_query_at = Some(now);
                    target.audit.touch(now);
                    txn.update(&mut target)?;
                    false
                }
                Transition::Close { status, install } => {
                    append_status_in(txn, tenant, id, status, feedback.messages.clone(), now)?;
                    let mut target = target_in(txn, tenant, controller_id)?;
                    target.last_query_at = Some(now);
                    txn.update(&mut target)?;
                    close_in(txn, &mut action, status, install, now)?;
                    true
                }
            };
            Ok(FeedbackOutcome {
                rollout: action.rollout_group,
                action,
                terminal,
            })
        });
        match &outcome {
            Ok(o) => debug!(
                %tenant,
                controller_id,
                action_id = id,
                execution = ?feedback.execution,
                terminal = o.terminal,
                "feedback accepted"
            ),
            Err(e) => warn!(%tenant, controller_id, action_id = id, error = %e, "feedback rejected"),
        }
        outcome
    }

    /// Handle a device poll: register or touch the target and surface its
    /// oldest active action.
    pub fn poll(&self, tenant: &Tenant, controller_id: &str) -> EngineResult<PollView> {
        let now = self.ctx.now();
        let sleep_secs = self.ctx.config.polling.sleep_secs;
        self.ctx.write("poll", |txn| {
            let target = touch_poll_in(txn, tenant, controller_id, now)?;
            let action = target_actions_in(txn, tenant, controller_id)?
                .into_iter()
                .find(|a| a.active);
            Ok(PollView {
                target,
                action,
                sleep_secs,
            })
        })
    }

    /// The deployment resource of an action. The first fetch of an active
    /// action records RETRIEVED while the status quota has room.
    pub fn deployment_base(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        id: EntityId,
    ) -> EngineResult<DeploymentView> {
        let now = self.ctx.now();
        let max_entries = self.ctx.config.quota.max_status_entries_per_action;
        self.ctx.write("deployment_base", |txn| {
            let mut action = owned_action_in(txn, tenant, controller_id, id)?;
            touch_poll_in(txn, tenant, controller_id, now)?;
            if action.active && !action.retrieved {
                let recorded =
                    txn.count::<ActionStatusEntry>(&ActionStatusEntry::prefix_for(tenant, id))?;
                if (recorded as u64) < max_entries {
                    append_status_in(
                        txn,
                        tenant,
                        id,
                        ActionStatus::Retrieved,
                        vec!["device retrieved the update action".to_string()],
                        now,
                    )?;
                }
                action.retrieved = true;
                action.audit.touch(now);
                txn.update(&mut action)?;
            }
            deployment_view_in(txn, action, now)
        })
    }

    /// Deployment details of an action waiting for confirmation.
    pub fn confirmation_base(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        id: EntityId,
    ) -> EngineResult<DeploymentView> {
        let now = self.ctx.now();
        self.ctx.read(|r| {
            let action = owned_action_in(r, tenant, controller_id, id)?;
            if action.status != ActionStatus::WaitForConfirmation {
                return Err(EngineError::not_found("confirmation", id));
            }
            deployment_view_in(r, action, now)
        })
    }

    /// The cancel resource; only canceling actions have one.
    pub fn cancel_view(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        id: EntityId,
    ) -> EngineResult<Action> {
        self.ctx.read(|r| {
            let action = owned_action_in(r, tenant, controller_id, id)?;
            if action.status != ActionStatus::Canceling {
                return Err(EngineError::not_found("cancel action", id));
            }
            Ok(action)
        })
    }

    /// Device answer to a confirmation request.
    pub fn confirm(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        id: EntityId,
        feedback: &ConfirmationFeedback,
    ) -> EngineResult<Action> {
        let now = self.ctx.now();
        let quotas = &self.ctx.config.quota;
        self.ctx.write("confirm_action", |txn| {
            let mut action = owned_action_in(txn, tenant, controller_id, id)?;
            if !action.active || action.status != ActionStatus::WaitForConfirmation {
                return Err(EngineError::InvalidState(format!(
                    "action {id} is not waiting for confirmation"
                )));
            }
            let parent = format!("action {id}");
            quota::check_and_reserve(
                "messages per status",
                &parent,
                0,
                feedback.details.len(),
                quotas.max_messages_per_status,
            )?;
            let recorded =
                txn.count::<ActionStatusEntry>(&ActionStatusEntry::prefix_for(tenant, id))?;
            quota::check_and_reserve(
                "status entries",
                &parent,
                recorded,
                1,
                quotas.max_status_entries_per_action,
            )?;
            let mut messages = feedback.details.clone();
            if let Some(code) = feedback.code {
                messages.push(format!("device code {code}"));
            }
            match feedback.confirmation {
                Confirmation::Confirmed => {
                    messages.push("confirmed by device".to_string());
                    append_status_in(txn, tenant, id, ActionStatus::Running, messages, now)?;
                    action.status = ActionStatus::Running;
                    action.audit.touch(now);
                    txn.update(&mut action)?;
                    info!(%tenant, controller_id, action_id = id, "action confirmed");
                }
                Confirmation::Denied => {
                    messages.push("denied by device".to_string());
                    append_status_in(
                        txn,
                        tenant,
                        id,
                        ActionStatus::WaitForConfirmation,
                        messages,
                        now,
                    )?;
                    debug!(%tenant, controller_id, action_id = id, "confirmation denied");
                }
            }
            Ok(action)
        })
    }

    /// Artifacts of a module the controller has been assigned.
    pub fn module_artifacts(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        module_id: EntityId,
    ) -> EngineResult<Vec<Artifact>> {
        self.ctx.read(|r| {
            check_module_assigned(r, tenant, controller_id, module_id)?;
            Ok(module_in(r, tenant, module_id)?.artifacts)
        })
    }

    pub fn artifact_download(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        module_id: EntityId,
        filename: &str,
    ) -> EngineResult<(Artifact, Vec<u8>)> {
        self.ctx.read(|r| {
            check_module_assigned(r, tenant, controller_id, module_id)?;
            artifact_content_in(r, tenant, module_id, filename)
        })
    }

    // ── History ────────────────────────────────────────────────────

    pub fn action(&self, tenant: &Tenant, id: EntityId) -> EngineResult<Action> {
        self.ctx.read(|r| action_in(r, tenant, id))
    }

    pub fn target_actions(&self, tenant: &Tenant, controller_id: &str) -> EngineResult<Vec<Action>> {
        self.ctx.read(|r| {
            target_in(r, tenant, controller_id)?;
            target_actions_in(r, tenant, controller_id)
        })
    }

    pub fn status_history(
        &self,
        tenant: &Tenant,
        id: EntityId,
    ) -> EngineResult<Vec<ActionStatusEntry>> {
        self.ctx.read(|r| {
            action_in(r, tenant, id)?;
            Ok(r.scan(&ActionStatusEntry::prefix_for(tenant, id))?)
        })
    }
}

fn deployment_view_in(r: &impl Reader, action: Action, now: u64) -> EngineResult<DeploymentView> {
    let set = set_in(r, &action.tenant, action.distribution_set)?;
    let chunks = set
        .modules
        .iter()
        .map(|id| {
            let module = module_in(r, &action.tenant, *id)?;
            Ok(Chunk {
                part: module.module_type,
                module_id: module.id,
                name: module.name,
                version: module.version,
                artifacts: module.artifacts,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(DeploymentView {
        handling: handling_for(&action, now),
        action,
        chunks,
    })
}

fn check_module_assigned(
    r: &impl Reader,
    tenant: &Tenant,
    controller_id: &str,
    module_id: EntityId,
) -> EngineResult<()> {
    target_in(r, tenant, controller_id)?;
    module_in(r, tenant, module_id)?;
    for action in target_actions_in(r, tenant, controller_id)? {
        if set_in(r, tenant, action.distribution_set)?
            .modules
            .contains(&module_id)
        {
            return Ok(());
        }
    }
    Err(EngineError::not_found("software module", module_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, fixture_with, tenant};
    use fleetgrid_state::{Clock, TargetUpdateStatus};

    fn feedback(execution: ExecutionPhase, result: Option<FeedbackResult>) -> Feedback {
        Feedback {
            execution,
            result,
            messages: vec![],
        }
    }

    fn closed(success: bool) -> Feedback {
        let result = if success {
            FeedbackResult::Success
        } else {
            FeedbackResult::Failure
        };
        feedback(ExecutionPhase::Closed, Some(result))
    }

    #[test]
    fn assign_creates_one_active_action_without_history() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);

        assert!(action.active);
        assert_eq!(action.status, ActionStatus::Running);
        let engine = &fx.services.actions;
        assert!(engine.status_history(&tenant(), action.id).unwrap().is_empty());
        let target = fx.services.targets.get(&tenant(), "dev-1").unwrap();
        assert_eq!(target.assigned_ds, Some(set.id));
        assert_eq!(target.update_status, TargetUpdateStatus::Pending);
        assert!(fx.services.catalog.set(&tenant(), set.id).unwrap().locked);
    }

    #[test]
    fn assignments_queue_oldest_first() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let d1 = fx.create_set("fw", "1");
        let d2 = fx.create_set("fw", "2");
        let a1 = fx.assign("dev-1", d1.id, ActionType::Forced);
        let a2 = fx.assign("dev-1", d2.id, ActionType::Forced);

        let engine = &fx.services.actions;
        let view = engine.poll(&tenant(), "dev-1").unwrap();
        assert_eq!(view.action.unwrap().id, a1.id);
        assert_eq!(view.target.assigned_ds, Some(d2.id));

        let outcome = engine
            .ingest_feedback(&tenant(), "dev-1", a1.id, &closed(true))
            .unwrap();
        assert!(outcome.terminal);
        assert_eq!(outcome.action.status, ActionStatus::Finished);
        let target = fx.services.targets.get(&tenant(), "dev-1").unwrap();
        assert_eq!(target.installed_ds, Some(d1.id));
        assert_eq!(target.update_status, TargetUpdateStatus::Pending);

        engine
            .ingest_feedback(&tenant(), "dev-1", a2.id, &closed(true))
            .unwrap();
        let target = fx.services.targets.get(&tenant(), "dev-1").unwrap();
        assert_eq!(target.installed_ds, Some(d2.id));
        assert_eq!(target.assigned_ds, Some(d2.id));
        assert_eq!(target.update_status, TargetUpdateStatus::InSync);
        assert!(engine.poll(&tenant(), "dev-1").unwrap().action.is_none());
    }

    #[test]
    fn failure_sets_error_and_keeps_installed() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Soft);
        fx.services
            .actions
            .ingest_feedback(&tenant(), "dev-1", action.id, &closed(false))
            .unwrap();
        let target = fx.services.targets.get(&tenant(), "dev-1").unwrap();
        assert_eq!(target.update_status, TargetUpdateStatus::Error);
        assert_eq!(target.installed_ds, None);
        let action = fx.services.actions.action(&tenant(), action.id).unwrap();
        assert_eq!(action.status, ActionStatus::Error);
        assert!(!action.active);
    }

    #[test]
    fn duplicate_terminal_feedback_is_rejected() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let engine = &fx.services.actions;
        engine
            .ingest_feedback(&tenant(), "dev-1", action.id, &closed(true))
            .unwrap();
        let again = engine.ingest_feedback(&tenant(), "dev-1", action.id, &closed(false));
        assert!(matches!(again, Err(EngineError::InvalidState(_))));
        let action = engine.action(&tenant(), action.id).unwrap();
        assert_eq!(action.status, ActionStatus::Finished);
        assert_eq!(engine.status_history(&tenant(), action.id).unwrap().len(), 1);
    }

    #[test]
    fn feedback_cap_rejects_without_recording() {
        let fx = fixture_with(|c| c.quota.max_status_entries_per_action = 100);
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let engine = &fx.services.actions;
        for i in 0..100 {
            let mut fb = feedback(ExecutionPhase::Proceeding, None);
            fb.messages.push(format!("step {i}"));
            engine
                .ingest_feedback(&tenant(), "dev-1", action.id, &fb)
                .unwrap();
        }
        let over = engine.ingest_feedback(
            &tenant(),
            "dev-1",
            action.id,
            &feedback(ExecutionPhase::Proceeding, None),
        );
        assert!(matches!(over, Err(EngineError::QuotaExceeded { .. })));
        let history = engine.status_history(&tenant(), action.id).unwrap();
        assert_eq!(history.len(), 100);
        assert_eq!(history.last().unwrap().messages, vec!["step 99".to_string()]);
    }

    #[test]
    fn feedback_for_foreign_or_unknown_action_is_not_found() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        fx.create_target("dev-2");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let engine = &fx.services.actions;
        let foreign = engine.ingest_feedback(&tenant(), "dev-2", action.id, &closed(true));
        assert!(matches!(foreign, Err(EngineError::NotFound { .. })));
        let unknown = engine.ingest_feedback(&tenant(), "dev-1", 999, &closed(true));
        assert!(matches!(unknown, Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn closed_without_result_is_invalid() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let result = fx.services.actions.ingest_feedback(
            &tenant(),
            "dev-1",
            action.id,
            &feedback(ExecutionPhase::Closed, None),
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn cancel_flow() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let engine = &fx.services.actions;

        engine.cancel(&tenant(), action.id, Some("ops")).unwrap();
        assert!(matches!(
            engine.cancel(&tenant(), action.id, None),
            Err(EngineError::InvalidState(_))
        ));
        assert!(engine.cancel_view(&tenant(), "dev-1", action.id).is_ok());

        // "rejected" while canceling stays an annotation.
        engine
            .ingest_feedback(
                &tenant(),
                "dev-1",
                action.id,
                &feedback(ExecutionPhase::Rejected, None),
            )
            .unwrap();
        let outcome = engine
            .ingest_feedback(
                &tenant(),
                "dev-1",
                action.id,
                &feedback(ExecutionPhase::Canceled, None),
            )
            .unwrap();
        assert_eq!(outcome.action.status, ActionStatus::Canceled);
        let target = fx.services.targets.get(&tenant(), "dev-1").unwrap();
        assert_eq!(target.assigned_ds, None);
        assert_eq!(target.update_status, TargetUpdateStatus::Registered);
    }

    #[test]
    fn canceled_on_running_action_is_a_warning() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let outcome = fx
            .services
            .actions
            .ingest_feedback(
                &tenant(),
                "dev-1",
                action.id,
                &feedback(ExecutionPhase::Canceled, None),
            )
            .unwrap();
        assert!(!outcome.terminal);
        assert_eq!(outcome.action.status, ActionStatus::Running);
        let history = fx.services.actions.status_history(&tenant(), action.id).unwrap();
        assert_eq!(history[0].status, ActionStatus::Warning);
    }

    #[test]
    fn force_quit_requires_canceling() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let engine = &fx.services.actions;
        assert!(matches!(
            engine.force_quit(&tenant(), action.id),
            Err(EngineError::InvalidState(_))
        ));
        engine.cancel(&tenant(), action.id, None).unwrap();
        let quit = engine.force_quit(&tenant(), action.id).unwrap();
        assert_eq!(quit.status, ActionStatus::Canceled);
        assert!(!quit.active);
    }

    #[test]
    fn force_escalates_soft_actions() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Soft);
        let forced = fx.services.actions.force(&tenant(), action.id).unwrap();
        assert_eq!(forced.action_type, ActionType::Forced);
        assert_eq!(forced.status, ActionStatus::Running);

        let dl = fx.assign("dev-1", set.id, ActionType::DownloadOnly);
        assert!(fx.services.actions.force(&tenant(), dl.id).is_err());
    }

    #[test]
    fn first_fetch_records_retrieved_once() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        let engine = &fx.services.actions;
        let view = engine.deployment_base(&tenant(), "dev-1", action.id).unwrap();
        assert_eq!(view.chunks.len(), 1);
        assert_eq!(view.handling.update, HandlingMode::Forced);
        engine.deployment_base(&tenant(), "dev-1", action.id).unwrap();
        let history = engine.status_history(&tenant(), action.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ActionStatus::Retrieved);
    }

    #[test]
    fn time_forced_handling_switches_at_forced_time() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx
            .services
            .actions
            .assign(
                &tenant(),
                &AssignRequest {
                    controller_id: "dev-1".into(),
                    distribution_set: set.id,
                    action_type: ActionType::TimeForced,
                    forced_time: Some(fx.clock.now_ms() + 60_000),
                },
            )
            .unwrap();
        let engine = &fx.services.actions;
        let view = engine.deployment_base(&tenant(), "dev-1", action.id).unwrap();
        assert_eq!(view.handling.update, HandlingMode::Attempt);
        fx.clock.advance(60_000);
        let view = engine.deployment_base(&tenant(), "dev-1", action.id).unwrap();
        assert_eq!(view.handling.update, HandlingMode::Forced);
    }

    #[test]
    fn time_forced_requires_forced_time() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let result = fx.services.actions.assign(
            &tenant(),
            &AssignRequest {
                controller_id: "dev-1".into(),
                distribution_set: set.id,
                action_type: ActionType::TimeForced,
                forced_time: None,
            },
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn download_only_closes_on_downloaded() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::DownloadOnly);
        let outcome = fx
            .services
            .actions
            .ingest_feedback(
                &tenant(),
                "dev-1",
                action.id,
                &feedback(ExecutionPhase::Downloaded, None),
            )
            .unwrap();
        assert!(outcome.terminal);
        assert_eq!(outcome.action.status, ActionStatus::Finished);
        let target = fx.services.targets.get(&tenant(), "dev-1").unwrap();
        assert_eq!(target.installed_ds, None);
    }

    #[test]
    fn incomplete_or_unknown_sets_cannot_be_assigned() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let empty = fx
            .services
            .catalog
            .create_set(
                &tenant(),
                &crate::catalog::NewDistributionSet {
                    name: "empty".into(),
                    version: "1".into(),
                    description: None,
                    set_type: "os_app".into(),
                    modules: vec![],
                },
            )
            .unwrap();
        let request = |ds| AssignRequest {
            controller_id: "dev-1".into(),
            distribution_set: ds,
            action_type: ActionType::Forced,
            forced_time: None,
        };
        let engine = &fx.services.actions;
        assert!(matches!(
            engine.assign(&tenant(), &request(empty.id)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.assign(&tenant(), &request(404)),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn active_action_quota() {
        let fx = fixture_with(|c| c.quota.max_active_actions_per_target = Some(1));
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        fx.assign("dev-1", set.id, ActionType::Forced);
        let second = fx.services.actions.assign(
            &tenant(),
            &AssignRequest {
                controller_id: "dev-1".into(),
                distribution_set: set.id,
                action_type: ActionType::Forced,
                forced_time: None,
            },
        );
        assert!(matches!(second, Err(EngineError::QuotaExceeded { .. })));
    }

    #[test]
    fn assign_many_is_all_or_nothing() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        fx.create_target("dev-2");
        let set = fx.create_set("fw", "1");
        let engine = &fx.services.actions;
        let result = engine.assign_many(
            &tenant(),
            set.id,
            ActionType::Forced,
            None,
            &["dev-1".into(), "dev-2".into(), "ghost".into()],
        );
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
        assert!(engine.target_actions(&tenant(), "dev-1").unwrap().is_empty());

        let actions = engine
            .assign_many(
                &tenant(),
                set.id,
                ActionType::Forced,
                None,
                &["dev-1".into(), "dev-2".into()],
            )
            .unwrap();
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn confirmation_required_flow() {
        let fx = fixture_with(|c| c.actions.user_confirmation_required = true);
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        assert_eq!(action.status, ActionStatus::WaitForConfirmation);

        let engine = &fx.services.actions;
        assert!(engine.confirmation_base(&tenant(), "dev-1", action.id).is_ok());
        let denied = engine
            .confirm(
                &tenant(),
                "dev-1",
                action.id,
                &ConfirmationFeedback {
                    confirmation: Confirmation::Denied,
                    code: None,
                    details: vec![],
                },
            )
            .unwrap();
        assert_eq!(denied.status, ActionStatus::WaitForConfirmation);
        let confirmed = engine
            .confirm(
                &tenant(),
                "dev-1",
                action.id,
                &ConfirmationFeedback {
                    confirmation: Confirmation::Confirmed,
                    code: Some(7),
                    details: vec!["ok".into()],
                },
            )
            .unwrap();
        assert_eq!(confirmed.status, ActionStatus::Running);
        assert_eq!(engine.status_history(&tenant(), action.id).unwrap().len(), 2);
    }

    #[test]
    fn artifacts_visible_only_to_assigned_controllers() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        fx.create_target("dev-2");
        let set = fx.create_set("fw", "1");
        let module_id = *set.modules.iter().next().unwrap();
        fx.services
            .catalog
            .upload_artifact(
                &tenant(),
                module_id,
                crate::catalog::ArtifactUpload {
                    filename: "os.img",
                    content: b"image",
                    sha256: None,
                    overwrite: false,
                },
            )
            .unwrap();
        fx.assign("dev-1", set.id, ActionType::Forced);

        let engine = &fx.services.actions;
        assert_eq!(
            engine.module_artifacts(&tenant(), "dev-1", module_id).unwrap().len(),
            1
        );
        assert!(engine.module_artifacts(&tenant(), "dev-2", module_id).is_err());
        assert!(engine.module_artifacts(&tenant(), "dev-1", 999).is_err());
        let (_, bytes) = engine
            .artifact_download(&tenant(), "dev-1", module_id, "os.img")
            .unwrap();
        assert_eq!(bytes, b"image");
    }

    #[test]
    fn deleting_target_cascades() {
        let fx = fixture();
        fx.create_types();
        fx.create_target("dev-1");
        let set = fx.create_set("fw", "1");
        let action = fx.assign("dev-1", set.id, ActionType::Forced);
        fx.services
            .actions
            .ingest_feedback(
                &tenant(),
                "dev-1",
                action.id,
                &feedback(ExecutionPhase::Proceeding, None),
            )
            .unwrap();
        fx.services.targets.delete(&tenant(), "dev-1").unwrap();
        assert!(fx.services.actions.action(&tenant(), action.id).is_err());
        let rows: usize = fx
            .ctx
            .read(|r| {
                Ok(r.count::<ActionStatusEntry>(&ActionStatusEntry::prefix_for(
                    &tenant(),
                    action.id,
                ))?)
            })
            .unwrap();
        assert_eq!(rows, 0);
    }
}
