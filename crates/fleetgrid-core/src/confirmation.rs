//! Confirmation Gate — per-target auto-confirmation of actions waiting for
//! manual approval.

use serde::{Deserialize, Serialize};
use tracing::info;

use fleetgrid_state::{Action, ActionStatus, AutoConfirmation, Tenant, WriteTxn};

use crate::actions::{append_status_in, target_actions_in};
use crate::context::CoreContext;
use crate::error::{EngineError, EngineResult};
use crate::registry::target_in;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivateAutoConfirm {
    pub initiator: Option<String>,
    pub remark: Option<String>,
}

/// Move a waiting action to RUNNING on behalf of the auto-confirmation.
///
/// The history row is system-attributed and bypasses the feedback quota.
pub fn auto_confirm_in(
    txn: &WriteTxn,
    action: &mut Action,
    auto: &AutoConfirmation,
    now: u64,
) -> EngineResult<()> {
    action.status = ActionStatus::Running;
    action.audit.touch(now);
    txn.update(action)?;
    let mut messages = vec![format!(
        "assignment automatically confirmed by initiator '{}'",
        auto.initiator.as_deref().unwrap_or("system")
    )];
    if let Some(remark) = &auto.remark {
        messages.push(remark.clone());
    }
    append_status_in(txn, &action.tenant, action.id, ActionStatus::Running, messages, now)?;
    info!(
        tenant = %action.tenant,
        controller_id = %action.controller_id,
        action_id = action.id,
        "action auto-confirmed"
    );
    Ok(())
}

#[derive(Clone)]
pub struct ConfirmationGate {
    ctx: CoreContext,
}

impl ConfirmationGate {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Turn auto-confirmation on and release every action already waiting.
    pub fn activate(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        request: &ActivateAutoConfirm,
    ) -> EngineResult<AutoConfirmation> {
        let now = self.ctx.now();
        self.ctx.write("activate_auto_confirm", |txn| {
            let mut target = target_in(txn, tenant, controller_id)?;
            if target.auto_confirm.is_some() {
                return Err(EngineError::already_exists("auto-confirmation", controller_id));
            }
            let auto = AutoConfirmation {
                initiator: request.initiator.clone(),
                remark: request.remark.clone(),
                activated_at: now,
            };
            target.auto_confirm = Some(auto.clone());
            target.audit.touch(now);
            txn.update(&mut target)?;

            let waiting = target_actions_in(txn, tenant, controller_id)?
                .into_iter()
                .filter(|a| a.active && a.status == ActionStatus::WaitForConfirmation);
            for mut action in waiting {
                auto_confirm_in(txn, &mut action, &auto, now)?;
            }
            info!(%tenant, controller_id, initiator = ?auto.initiator, "auto-confirmation activated");
            Ok(auto)
        })
    }

    /// Turn auto-confirmation off. Deactivating twice is fine.
    pub fn deactivate(&self, tenant: &Tenant, controller_id: &str) -> EngineResult<()> {
        let now = self.ctx.now();
        self.ctx.write("deactivate_auto_confirm", |txn| {
            let mut target = target_in(txn, tenant, controller_id)?;
            if target.auto_confirm.take().is_some() {
                target.audit.touch(now);
                txn.update(&mut target)?;
                info!(%tenant, controller_id, "auto-confirmation deactivated");
            }
            Ok(())
        })
    }

    pub fn status(
        &self,
        tenant: &Tenant,
        controller_id: &str,
    ) -> EngineResult<Option<AutoConfirmation>> {
        Ok(self
            .ctx
            .read(|r| target_in(r, tenant, controller_id))?
            .auto_confirm)
    }
}
