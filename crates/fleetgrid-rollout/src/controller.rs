//! Rollout controller — decides the next step of a rollout.
//!
//! Planning is pure: it looks at a snapshot of the rollout, its groups and
//! the progress of each running group, and returns at most one [`Step`].
//! The scheduler applies the step in a write transaction and plans again.

use serde::{Deserialize, Serialize};

use fleetgrid_state::{
    Action, ActionStatus, ControllerId, EntityId, Rollout, RolloutGroup, RolloutGroupStatus,
    RolloutStatus,
};

/// Action counts of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProgress {
    pub total: u64,
    pub finished: u64,
    pub errored: u64,
    pub canceled: u64,
    pub running: u64,
}

impl GroupProgress {
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut p = Self {
            total: actions.len() as u64,
            ..Self::default()
        };
        for action in actions {
            match action.status {
                ActionStatus::Finished => p.finished += 1,
                ActionStatus::Error => p.errored += 1,
                ActionStatus::Canceled => p.canceled += 1,
                _ => p.running += 1,
            }
        }
        p
    }

    fn reached(count: u64, total: u64, threshold: u8) -> bool {
        count * 100 >= u64::from(threshold) * total
    }

    pub fn error_threshold_reached(&self, threshold: u8) -> bool {
        self.errored > 0 && Self::reached(self.errored, self.total, threshold)
    }

    /// An empty group counts as succeeded.
    pub fn success_threshold_reached(&self, threshold: u8) -> bool {
        self.total == 0 || Self::reached(self.finished, self.total, threshold)
    }

    pub fn all_terminal(&self) -> bool {
        self.running == 0
    }
}

/// Everything the controller needs to plan one step.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub rollout: Rollout,
    /// Ordered by position.
    pub groups: Vec<RolloutGroup>,
    /// Progress of the RUNNING group, if there is one.
    pub progress: Option<GroupProgress>,
    /// Targets that match the rollout filter but belong to no group.
    /// Only collected when late targets join the last group.
    pub late_targets: Vec<ControllerId>,
}

impl Snapshot {
    /// First group that is neither FINISHED nor ERROR.
    pub fn current_group(&self) -> Option<&RolloutGroup> {
        self.groups.iter().find(|g| !g.status.is_terminal())
    }
}

/// One state transition of a rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// READY rollout whose start time has passed.
    AutoStart,
    /// STARTING → RUNNING.
    MarkRunning,
    /// Create the group's actions and move it to RUNNING.
    StartGroup { group_id: EntityId },
    /// Error threshold reached: pause the rollout.
    FireErrorAction { group_id: EntityId },
    /// Success threshold reached: group FINISHED, rollout FINISHED if last.
    CompleteGroup { group_id: EntityId, last: bool },
    /// All actions terminal without success: group and rollout ERROR.
    FailGroup { group_id: EntityId },
    /// No group left to run.
    FinishRollout,
    /// Append newly matching targets to the last group.
    JoinLate {
        group_id: EntityId,
        targets: Vec<ControllerId>,
    },
}

impl Step {
    /// Steps after which the current pass stops; the next group waits for
    /// the following pass.
    pub fn ends_pass(&self) -> bool {
        !matches!(
            self,
            Self::AutoStart | Self::MarkRunning | Self::StartGroup { .. } | Self::JoinLate { .. }
        )
    }
}

/// Plan the next step, or `None` if the rollout has nothing to do.
///
/// Late targets join only when the rollout has no other step.
pub fn next_step(snapshot: &Snapshot, now: u64) -> Option<Step> {
    status_step(snapshot, now).or_else(|| join_late(snapshot))
}

fn status_step(snapshot: &Snapshot, now: u64) -> Option<Step> {
    let rollout = &snapshot.rollout;
    match rollout.status {
        RolloutStatus::Ready => match rollout.start_at {
            Some(at) if at <= now => Some(Step::AutoStart),
            _ => None,
        },
        RolloutStatus::Starting => Some(Step::MarkRunning),
        RolloutStatus::Running => {
            let Some(group) = snapshot.current_group() else {
                return Some(Step::FinishRollout);
            };
            match group.status {
                RolloutGroupStatus::Scheduled | RolloutGroupStatus::Ready => {
                    Some(Step::StartGroup { group_id: group.id })
                }
                RolloutGroupStatus::Running => {
                    let progress = snapshot.progress?;
                    evaluate_running(snapshot, group, &progress)
                }
                RolloutGroupStatus::Finished | RolloutGroupStatus::Error => None,
            }
        }
        _ => None,
    }
}

fn join_late(snapshot: &Snapshot) -> Option<Step> {
    if snapshot.late_targets.is_empty()
        || !matches!(
            snapshot.rollout.status,
            RolloutStatus::Ready
                | RolloutStatus::Starting
                | RolloutStatus::Running
                | RolloutStatus::Paused
        )
    {
        return None;
    }
    let last = snapshot.groups.last().filter(|g| !g.status.is_terminal())?;
    Some(Step::JoinLate {
        group_id: last.id,
        targets: snapshot.late_targets.clone(),
    })
}

fn evaluate_running(
    snapshot: &Snapshot,
    group: &RolloutGroup,
    progress: &GroupProgress,
) -> Option<Step> {
    if !group.error_action_fired && progress.error_threshold_reached(group.error_threshold) {
        return Some(Step::FireErrorAction { group_id: group.id });
    }
    if progress.success_threshold_reached(group.success_threshold) {
        let last = snapshot
            .groups
            .last()
            .is_some_and(|g| g.id == group.id);
        return Some(Step::CompleteGroup {
            group_id: group.id,
            last,
        });
    }
    if progress.all_terminal() {
        return Some(Step::FailGroup { group_id: group.id });
    }
    None
}
