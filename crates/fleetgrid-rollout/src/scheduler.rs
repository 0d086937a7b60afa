//! Rollout Scheduler — lifecycle operations and the advancement pass.
//!
//! Operator transitions (create, approve, start, pause, ...) each run in one
//! write transaction. Advancement plans a [`Step`] from a read snapshot and
//! applies it in a write transaction; the optimistic version on the rollout
//! row turns a concurrent change into a conflict, and the whole plan+apply
//! is retried.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use fleetgrid_core::actions::{AssignRequest, group_actions_in};
use fleetgrid_core::catalog::lock_assignable_set_in;
use fleetgrid_core::registry::matching_targets_in;
use fleetgrid_core::{
    ActionEngine, CoreContext, EngineError, EngineResult, LateTargetPolicy, TargetFilter, quota,
};
use fleetgrid_state::tables::ACTIONS_BY_GROUP;
use fleetgrid_state::{
    Action, ActionType, ApprovalDecision, Audit, ControllerId, EntityId, ErrorAction, Reader,
    Rollout, RolloutGroup, RolloutGroupStatus, RolloutStatus, SuccessAction, Target, Tenant,
    WriteTxn, id_key, retry,
};

use crate::controller::{GroupProgress, Snapshot, Step, next_step};
use crate::error::{RolloutError, RolloutResult};
use crate::groups::{GroupsValidation, PlannedGroup, partition, summarize};
use crate::locks::RolloutLocks;
use crate::strategy::{ApprovalRequest, GroupStrategy, NewRollout};

/// Upper bound on steps applied in one pass.
const MAX_STEPS_PER_PASS: usize = 8;

/// Progress of one group as shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupProgressView {
    pub group_id: EntityId,
    pub name: String,
    pub status: RolloutGroupStatus,
    pub target_count: u64,
    pub progress: GroupProgress,
}

/// What one advancement pass did.
#[derive(Debug, Clone, Default)]
pub struct AdvanceReport {
    /// Another pass held the rollout lock.
    pub skipped: bool,
    pub steps: Vec<Step>,
}

/// Totals of one sweep over every tenant's rollouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub advanced: usize,
    pub failed: usize,
}

pub fn rollout_in(r: &impl Reader, tenant: &Tenant, id: EntityId) -> EngineResult<Rollout> {
    r.get::<Rollout>(&Rollout::key_for(tenant, id))?
        .ok_or_else(|| EngineError::not_found("rollout", id))
}

/// Groups of a rollout ordered by position.
pub fn groups_in(
    r: &impl Reader,
    tenant: &Tenant,
    rollout_id: EntityId,
) -> EngineResult<Vec<RolloutGroup>> {
    let mut groups: Vec<RolloutGroup> = r.scan(&RolloutGroup::prefix_for(tenant, rollout_id))?;
    groups.sort_by_key(|g| g.position);
    Ok(groups)
}

#[derive(Clone)]
pub struct RolloutScheduler {
    ctx: CoreContext,
    actions: ActionEngine,
    locks: RolloutLocks,
}

impl RolloutScheduler {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            actions: ActionEngine::new(ctx.clone()),
            locks: RolloutLocks::new(),
            ctx,
        }
    }

    pub fn locks(&self) -> &RolloutLocks {
        &self.locks
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create a rollout and partition its targets into groups.
    ///
    /// A layout that does not cover the population still persists the
    /// rollout in CREATING and returns `GroupValidation` with its id.
    pub fn create(&self, tenant: &Tenant, request: &NewRollout) -> RolloutResult<Rollout> {
        if request.name.trim().is_empty() {
            return Err(EngineError::Validation("rollout name is required".into()).into());
        }
        if request.action_type == ActionType::TimeForced && request.forced_time.is_none() {
            return Err(EngineError::Validation(
                "time-forced rollout requires a forced time".into(),
            )
            .into());
        }
        let filter = TargetFilter::parse(&request.target_filter)?;
        self.check_group_quota(&request.name, &request.groups)?;
        let now = self.ctx.now();

        let (rollout, invalid) = self.ctx.write("create_rollout", |txn| {
            let existing: Vec<Rollout> = txn.scan(&tenant.prefix())?;
            if existing.iter().any(|r| r.name == request.name) {
                return Err(EngineError::already_exists("rollout", &request.name));
            }
            lock_assignable_set_in(txn, tenant, request.distribution_set, now)?;
            let matched = matching_targets_in(txn, tenant, &filter)?;

            let mut rollout = Rollout {
                tenant: tenant.clone(),
                id: txn.next_id(tenant, "rollout")?,
                name: request.name.clone(),
                description: request.description.clone(),
                target_filter: filter.as_str().to_string(),
                distribution_set: request.distribution_set,
                action_type: request.action_type,
                forced_time: request.forced_time,
                status: RolloutStatus::Creating,
                total_targets: matched.len() as u64,
                start_at: request.start_at,
                approval: None,
                last_error: None,
                audit: Audit::new(now),
            };
            txn.insert(&mut rollout)?;
            let invalid = self.define_groups_in(txn, &mut rollout, &matched, &request.groups, now)?;
            txn.update(&mut rollout)?;
            Ok((rollout, invalid))
        })?;

        if let Some(validation) = invalid {
            warn!(
                %tenant,
                rollout_id = rollout.id,
                error = ?validation.error,
                "rollout created with invalid groups"
            );
            return Err(RolloutError::GroupValidation {
                rollout_id: Some(rollout.id),
                validation,
            });
        }
        info!(
            %tenant,
            rollout_id = rollout.id,
            targets = rollout.total_targets,
            status = ?rollout.status,
            "rollout created"
        );
        Ok(rollout)
    }

    /// Dry run of a group layout against the current population.
    pub fn validate_groups(
        &self,
        tenant: &Tenant,
        target_filter: &str,
        strategy: &GroupStrategy,
    ) -> RolloutResult<GroupsValidation> {
        let filter = TargetFilter::parse(target_filter)?;
        let matched = self.ctx.read(|r| matching_targets_in(r, tenant, &filter))?;
        Ok(match partition(&matched, strategy, &self.ctx.config.rollout) {
            Ok(groups) => summarize(&groups),
            Err(validation) => validation,
        })
    }

    /// Replace the groups of a rollout still in CREATING.
    pub fn redefine_groups(
        &self,
        tenant: &Tenant,
        id: EntityId,
        strategy: &GroupStrategy,
    ) -> RolloutResult<Rollout> {
        let now = self.ctx.now();
        let name = self.get(tenant, id)?.name;
        self.check_group_quota(&name, strategy)?;

        let (rollout, invalid) = self.ctx.write("redefine_rollout_groups", |txn| {
            let mut rollout = rollout_in(txn, tenant, id)?;
            if rollout.status != RolloutStatus::Creating {
                return Err(EngineError::InvalidState(format!(
                    "rollout {id} is {:?}; groups can only be redefined while creating",
                    rollout.status
                )));
            }
            txn.remove_prefix::<RolloutGroup>(&RolloutGroup::prefix_for(tenant, id))?;
            let filter = TargetFilter::parse(&rollout.target_filter)?;
            let matched = matching_targets_in(txn, tenant, &filter)?;
            rollout.total_targets = matched.len() as u64;
            rollout.audit.touch(now);
            let invalid = self.define_groups_in(txn, &mut rollout, &matched, strategy, now)?;
            txn.update(&mut rollout)?;
            Ok((rollout, invalid))
        })?;

        match invalid {
            Some(validation) => Err(RolloutError::GroupValidation {
                rollout_id: Some(id),
                validation,
            }),
            None => {
                info!(%tenant, rollout_id = id, status = ?rollout.status, "rollout groups redefined");
                Ok(rollout)
            }
        }
    }

    fn check_group_quota(&self, parent: &str, strategy: &GroupStrategy) -> EngineResult<()> {
        quota::check_and_reserve(
            "rollout groups",
            parent,
            0,
            strategy.group_count(),
            self.ctx.config.quota.max_groups_per_rollout,
        )
    }

    /// Partition `matched` and persist the groups. Returns the validation
    /// result when the layout is unusable; the rollout then stays CREATING.
    fn define_groups_in(
        &self,
        txn: &WriteTxn,
        rollout: &mut Rollout,
        matched: &[Target],
        strategy: &GroupStrategy,
        now: u64,
    ) -> EngineResult<Option<GroupsValidation>> {
        let planned = match partition(matched, strategy, &self.ctx.config.rollout) {
            Ok(planned) => planned,
            Err(validation) => {
                rollout.last_error = validation.error.clone();
                return Ok(Some(validation));
            }
        };
        let limit = self.ctx.config.quota.max_targets_per_group;
        for group in &planned {
            quota::check_and_reserve("group targets", &group.name, 0, group.targets.len(), limit)?;
        }
        for (position, group) in planned.into_iter().enumerate() {
            self.insert_group_in(txn, rollout, position as u32, group, now)?;
        }
        rollout.last_error = None;
        rollout.status = if self.ctx.config.rollout.approval_required {
            RolloutStatus::WaitingForApproval
        } else {
            RolloutStatus::Ready
        };
        Ok(None)
    }

    fn insert_group_in(
        &self,
        txn: &WriteTxn,
        rollout: &Rollout,
        position: u32,
        planned: PlannedGroup,
        now: u64,
    ) -> EngineResult<()> {
        let mut group = RolloutGroup {
            tenant: rollout.tenant.clone(),
            rollout_id: rollout.id,
            id: txn.next_id(&rollout.tenant, "rollout_group")?,
            position,
            name: planned.name,
            description: planned.description,
            target_filter: planned.target_filter,
            target_percentage: planned.target_percentage,
            success_threshold: planned.success_threshold,
            success_action: SuccessAction::NextGroup,
            error_threshold: planned.error_threshold,
            error_action: ErrorAction::Pause,
            status: if position == 0 {
                RolloutGroupStatus::Ready
            } else {
                RolloutGroupStatus::Scheduled
            },
            targets: planned.targets,
            error_action_fired: false,
            audit: Audit::new(now),
        };
        txn.insert(&mut group)?;
        debug!(
            tenant = %rollout.tenant,
            rollout_id = rollout.id,
            group_id = group.id,
            targets = group.targets.len(),
            "rollout group defined"
        );
        Ok(())
    }

    // ── Operator transitions ───────────────────────────────────────

    pub fn approve(
        &self,
        tenant: &Tenant,
        id: EntityId,
        request: &ApprovalRequest,
    ) -> RolloutResult<Rollout> {
        self.decide(tenant, id, request, true)
    }

    pub fn deny(
        &self,
        tenant: &Tenant,
        id: EntityId,
        request: &ApprovalRequest,
    ) -> RolloutResult<Rollout> {
        self.decide(tenant, id, request, false)
    }

    fn decide(
        &self,
        tenant: &Tenant,
        id: EntityId,
        request: &ApprovalRequest,
        approved: bool,
    ) -> RolloutResult<Rollout> {
        let now = self.ctx.now();
        let rollout = self.transition("decide_rollout_approval", tenant, id, now, |rollout| {
            expect_status(rollout, RolloutStatus::WaitingForApproval, "approve or deny")?;
            rollout.status = if approved {
                RolloutStatus::Ready
            } else {
                RolloutStatus::ApprovalDenied
            };
            rollout.approval = Some(ApprovalDecision {
                approved,
                decided_by: request.decided_by.clone(),
                remark: request.remark.clone(),
                decided_at: now,
            });
            Ok(())
        })?;
        info!(%tenant, rollout_id = id, approved, decided_by = ?request.decided_by, "rollout approval decided");
        Ok(rollout)
    }

    /// READY → STARTING, then run a pass to start the first group.
    pub fn start(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Rollout> {
        let now = self.ctx.now();
        self.transition("start_rollout", tenant, id, now, |rollout| {
            expect_status(rollout, RolloutStatus::Ready, "start")?;
            rollout.status = RolloutStatus::Starting;
            Ok(())
        })?;
        info!(%tenant, rollout_id = id, "rollout starting");
        self.advance_logged(tenant, id);
        self.get(tenant, id)
    }

    pub fn pause(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Rollout> {
        let now = self.ctx.now();
        let rollout = self.transition("pause_rollout", tenant, id, now, |rollout| {
            expect_status(rollout, RolloutStatus::Running, "pause")?;
            rollout.status = RolloutStatus::Paused;
            Ok(())
        })?;
        info!(%tenant, rollout_id = id, "rollout paused");
        Ok(rollout)
    }

    /// PAUSED → RUNNING; evaluation continues from the first open group.
    pub fn resume(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Rollout> {
        let now = self.ctx.now();
        self.transition("resume_rollout", tenant, id, now, |rollout| {
            expect_status(rollout, RolloutStatus::Paused, "resume")?;
            rollout.status = RolloutStatus::Running;
            Ok(())
        })?;
        info!(%tenant, rollout_id = id, "rollout resumed");
        self.advance_logged(tenant, id);
        self.get(tenant, id)
    }

    /// Force the running group FINISHED and start the next one now.
    pub fn trigger_next_group(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Rollout> {
        let now = self.ctx.now();
        let rollout = self.ctx.write("trigger_next_group", |txn| {
            let mut rollout = rollout_in(txn, tenant, id)?;
            expect_status(&rollout, RolloutStatus::Running, "trigger the next group of")?;
            let groups = groups_in(txn, tenant, id)?;
            let mut open = groups.into_iter().filter(|g| !g.status.is_terminal());
            let Some(mut current) = open.next() else {
                return Err(EngineError::InvalidState(format!(
                    "rollout {id} has no open group"
                )));
            };
            if current.status != RolloutGroupStatus::Running {
                return Err(EngineError::InvalidState(format!(
                    "group {} of rollout {id} is not running",
                    current.id
                )));
            }
            current.status = RolloutGroupStatus::Finished;
            current.audit.touch(now);
            txn.update(&mut current)?;
            info!(%tenant, rollout_id = id, group_id = current.id, "rollout group finished by operator");

            match open.next() {
                Some(mut next) => self.start_group_in(txn, &rollout, &mut next, now)?,
                None => {
                    rollout.status = RolloutStatus::Finished;
                    info!(%tenant, rollout_id = id, "rollout finished");
                }
            }
            rollout.audit.touch(now);
            txn.update(&mut rollout)?;
            Ok(rollout)
        })?;
        Ok(rollout)
    }

    /// Remove a rollout that is not in flight. Its actions are kept.
    pub fn delete(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<()> {
        self.ctx.write("delete_rollout", |txn| {
            let rollout = rollout_in(txn, tenant, id)?;
            if matches!(
                rollout.status,
                RolloutStatus::Starting | RolloutStatus::Running | RolloutStatus::Paused
            ) {
                return Err(EngineError::InvalidState(format!(
                    "rollout {id} is {:?} and cannot be deleted",
                    rollout.status
                )));
            }
            for group in groups_in(txn, tenant, id)? {
                let prefix = Action::group_index_prefix(tenant, group.id);
                for action_id in txn.index_ids(ACTIONS_BY_GROUP, &prefix)? {
                    txn.index_remove(ACTIONS_BY_GROUP, &format!("{prefix}{}", id_key(action_id)))?;
                }
            }
            txn.remove_prefix::<RolloutGroup>(&RolloutGroup::prefix_for(tenant, id))?;
            txn.remove::<Rollout>(&Rollout::key_for(tenant, id))?;
            Ok(())
        })?;
        info!(%tenant, rollout_id = id, "rollout deleted");
        Ok(())
    }

    /// Load, check and update a rollout row in one transaction.
    fn transition(
        &self,
        op: &str,
        tenant: &Tenant,
        id: EntityId,
        now: u64,
        change: impl Fn(&mut Rollout) -> EngineResult<()>,
    ) -> EngineResult<Rollout> {
        self.ctx.write(op, |txn| {
            let mut rollout = rollout_in(txn, tenant, id)?;
            change(&mut rollout)?;
            rollout.audit.touch(now);
            txn.update(&mut rollout)?;
            Ok(rollout)
        })
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Rollout> {
        Ok(self.ctx.read(|r| rollout_in(r, tenant, id))?)
    }

    pub fn list(&self, tenant: &Tenant) -> RolloutResult<Vec<Rollout>> {
        Ok(self.ctx.read(|r| r.scan::<Rollout>(&tenant.prefix()).map_err(EngineError::from))?)
    }

    pub fn groups(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Vec<RolloutGroup>> {
        Ok(self.ctx.read(|r| {
            rollout_in(r, tenant, id)?;
            groups_in(r, tenant, id)
        })?)
    }

    pub fn progress(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<Vec<GroupProgressView>> {
        Ok(self.ctx.read(|r| {
            rollout_in(r, tenant, id)?;
            groups_in(r, tenant, id)?
                .into_iter()
                .map(|g| {
                    let actions = group_actions_in(r, tenant, g.id)?;
                    Ok(GroupProgressView {
                        group_id: g.id,
                        name: g.name,
                        status: g.status,
                        target_count: g.targets.len() as u64,
                        progress: GroupProgress::from_actions(&actions),
                    })
                })
                .collect::<EngineResult<Vec<_>>>()
        })?)
    }

    // ── Advancement ────────────────────────────────────────────────

    /// Run one advancement pass for a rollout.
    ///
    /// Skips without error when another pass holds the rollout's lock.
    pub fn advance(&self, tenant: &Tenant, id: EntityId) -> RolloutResult<AdvanceReport> {
        self.advance_bounded(tenant, id, MAX_STEPS_PER_PASS)
    }

    fn advance_bounded(
        &self,
        tenant: &Tenant,
        id: EntityId,
        max_steps: usize,
    ) -> RolloutResult<AdvanceReport> {
        let Some(_guard) = self.locks.try_acquire(tenant, id) else {
            debug!(%tenant, rollout_id = id, "advancement already in progress, skipping");
            return Ok(AdvanceReport {
                skipped: true,
                steps: Vec::new(),
            });
        };

        let mut report = AdvanceReport::default();
        while report.steps.len() < max_steps {
            let now = self.ctx.now();
            let applied = retry(&self.ctx.config.retry, "advance_rollout", || {
                let snapshot = self.ctx.read(|r| self.snapshot_in(r, tenant, id))?;
                let Some(step) = next_step(&snapshot, now) else {
                    return Ok(None);
                };
                self.ctx
                    .store
                    .write(|txn| self.apply_in(txn, &snapshot, &step, now))?;
                Ok::<_, EngineError>(Some(step))
            })?;
            let Some(step) = applied else {
                break;
            };
            let ends_pass = step.ends_pass();
            report.steps.push(step);
            if ends_pass {
                break;
            }
        }
        Ok(report)
    }

    fn advance_logged(&self, tenant: &Tenant, id: EntityId) {
        if let Err(e) = self.advance(tenant, id) {
            warn!(%tenant, rollout_id = id, error = %e, "rollout advancement failed, next sweep retries");
        }
    }

    /// Advance every rollout that may have work, across all tenants.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let join_late = self.ctx.config.rollout.late_target_policy == LateTargetPolicy::JoinLastGroup;
        let rollouts: Vec<Rollout> = match self.ctx.read(|r| r.scan::<Rollout>("").map_err(EngineError::from)) {
            Ok(rollouts) => rollouts,
            Err(e) => {
                error!(error = %e, "failed to list rollouts for sweep");
                return report;
            }
        };
        for rollout in rollouts {
            let candidate = match rollout.status {
                RolloutStatus::Starting | RolloutStatus::Running => true,
                RolloutStatus::Ready => rollout.start_at.is_some() || join_late,
                RolloutStatus::Paused => join_late,
                _ => false,
            };
            if !candidate {
                continue;
            }
            report.examined += 1;
            match self.advance(&rollout.tenant, rollout.id) {
                Ok(r) if !r.steps.is_empty() => report.advanced += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(
                        tenant = %rollout.tenant,
                        rollout_id = rollout.id,
                        error = %e,
                        "rollout advancement failed"
                    );
                }
            }
        }
        debug!(
            examined = report.examined,
            advanced = report.advanced,
            failed = report.failed,
            "rollout sweep complete"
        );
        report
    }

    fn snapshot_in(&self, r: &impl Reader, tenant: &Tenant, id: EntityId) -> EngineResult<Snapshot> {
        let rollout = rollout_in(r, tenant, id)?;
        let groups = groups_in(r, tenant, id)?;

        let progress = match groups.iter().find(|g| !g.status.is_terminal()) {
            Some(g) if g.status == RolloutGroupStatus::Running => Some(GroupProgress::from_actions(
                &group_actions_in(r, tenant, g.id)?,
            )),
            _ => None,
        };

        let collect_late = self.ctx.config.rollout.late_target_policy
            == LateTargetPolicy::JoinLastGroup
            && matches!(
                rollout.status,
                RolloutStatus::Ready
                    | RolloutStatus::Starting
                    | RolloutStatus::Running
                    | RolloutStatus::Paused
            );
        let late_targets = if collect_late {
            let grouped: HashSet<&str> = groups
                .iter()
                .flat_map(|g| g.targets.iter().map(String::as_str))
                .collect();
            let filter = TargetFilter::parse(&rollout.target_filter)?;
            let mut late: Vec<ControllerId> = matching_targets_in(r, tenant, &filter)?
                .into_iter()
                .map(|t| t.controller_id)
                .filter(|cid| !grouped.contains(cid.as_str()))
                .collect();
            if let Some(last) = groups.last().filter(|g| !g.status.is_terminal()) {
                let room = self
                    .ctx
                    .config
                    .quota
                    .max_targets_per_group
                    .saturating_sub(last.targets.len() as u64);
                let room = usize::try_from(room).unwrap_or(usize::MAX);
                if late.len() > room {
                    warn!(
                        %tenant,
                        rollout_id = id,
                        group_id = last.id,
                        left_out = late.len() - room,
                        limit = self.ctx.config.quota.max_targets_per_group,
                        "last rollout group is full, late targets left out"
                    );
                    late.truncate(room);
                }
            }
            late
        } else {
            Vec::new()
        };

        Ok(Snapshot {
            rollout,
            groups,
            progress,
            late_targets,
        })
    }

    /// Apply a planned step. Updating the snapshot's rollout row makes any
    /// concurrent change since planning surface as a conflict.
    fn apply_in(
        &self,
        txn: &WriteTxn,
        snapshot: &Snapshot,
        step: &Step,
        now: u64,
    ) -> EngineResult<()> {
        let mut rollout = snapshot.rollout.clone();
        let tenant = rollout.tenant.clone();
        let rollout_id = rollout.id;
        let group_of = |group_id: EntityId| {
            snapshot
                .groups
                .iter()
                .find(|g| g.id == group_id)
                .cloned()
                .ok_or_else(|| EngineError::not_found("rollout group", group_id))
        };

        match step {
            Step::AutoStart => {
                rollout.status = RolloutStatus::Starting;
                info!(%tenant, rollout_id, "rollout start time reached");
            }
            Step::MarkRunning => {
                rollout.status = RolloutStatus::Running;
                info!(%tenant, rollout_id, "rollout running");
            }
            Step::StartGroup { group_id } => {
                let mut group = group_of(*group_id)?;
                self.start_group_in(txn, &rollout, &mut group, now)?;
            }
            Step::FireErrorAction { group_id } => {
                let mut group = group_of(*group_id)?;
                group.error_action_fired = true;
                group.audit.touch(now);
                txn.update(&mut group)?;
                rollout.status = RolloutStatus::Paused;
                warn!(
                    %tenant,
                    rollout_id,
                    group_id,
                    error_threshold = group.error_threshold,
                    "group error threshold reached, rollout paused"
                );
            }
            Step::CompleteGroup { group_id, last } => {
                let mut group = group_of(*group_id)?;
                group.status = RolloutGroupStatus::Finished;
                group.audit.touch(now);
                txn.update(&mut group)?;
                info!(%tenant, rollout_id, group_id, "rollout group finished");
                if *last {
                    rollout.status = RolloutStatus::Finished;
                    info!(%tenant, rollout_id, "rollout finished");
                }
            }
            Step::FailGroup { group_id } => {
                let mut group = group_of(*group_id)?;
                group.status = RolloutGroupStatus::Error;
                group.audit.touch(now);
                txn.update(&mut group)?;
                rollout.status = RolloutStatus::Error;
                rollout.last_error = Some(format!(
                    "group '{}' completed below its success threshold",
                    group.name
                ));
                error!(%tenant, rollout_id, group_id, "rollout group failed");
            }
            Step::FinishRollout => {
                rollout.status = RolloutStatus::Finished;
                info!(%tenant, rollout_id, "rollout finished");
            }
            Step::JoinLate { group_id, targets } => {
                let mut group = group_of(*group_id)?;
                quota::check_and_reserve(
                    "group targets",
                    &group.name,
                    group.targets.len(),
                    targets.len(),
                    self.ctx.config.quota.max_targets_per_group,
                )?;
                if group.status == RolloutGroupStatus::Running {
                    for controller_id in targets {
                        self.assign_member_in(txn, &rollout, &group, controller_id, now)?;
                    }
                }
                group.targets.extend(targets.iter().cloned());
                group.audit.touch(now);
                txn.update(&mut group)?;
                rollout.total_targets += targets.len() as u64;
                info!(%tenant, rollout_id, group_id, joined = targets.len(), "late targets joined rollout group");
            }
        }

        rollout.audit.touch(now);
        txn.update(&mut rollout)?;
        Ok(())
    }

    /// Create the actions of every member that still exists and move the
    /// group to RUNNING. Any failure aborts the caller's transaction.
    fn start_group_in(
        &self,
        txn: &WriteTxn,
        rollout: &Rollout,
        group: &mut RolloutGroup,
        now: u64,
    ) -> EngineResult<()> {
        let mut created = 0;
        for controller_id in &group.targets {
            if self.assign_member_in(txn, rollout, group, controller_id, now)? {
                created += 1;
            }
        }
        group.status = RolloutGroupStatus::Running;
        group.audit.touch(now);
        txn.update(group)?;
        info!(
            tenant = %rollout.tenant,
            rollout_id = rollout.id,
            group_id = group.id,
            actions = created,
            "rollout group started"
        );
        Ok(())
    }

    /// Returns false for a member deleted since the groups were defined.
    fn assign_member_in(
        &self,
        txn: &WriteTxn,
        rollout: &Rollout,
        group: &RolloutGroup,
        controller_id: &str,
        now: u64,
    ) -> EngineResult<bool> {
        if txn
            .get::<Target>(&Target::key_for(&rollout.tenant, controller_id))?
            .is_none()
        {
            debug!(
                tenant = %rollout.tenant,
                rollout_id = rollout.id,
                controller_id,
                "skipping deleted rollout target"
            );
            return Ok(false);
        }
        let request = AssignRequest {
            controller_id: controller_id.to_string(),
            distribution_set: rollout.distribution_set,
            action_type: rollout.action_type,
            forced_time: rollout.forced_time,
        };
        self.actions
            .assign_in(txn, &rollout.tenant, &request, Some(group.group_ref()), now)?;
        Ok(true)
    }
}

fn expect_status(rollout: &Rollout, expected: RolloutStatus, op: &str) -> EngineResult<()> {
    if rollout.status != expected {
        return Err(EngineError::InvalidState(format!(
            "cannot {op} rollout {} in status {:?}",
            rollout.id, rollout.status
        )));
    }
    Ok(())
}
