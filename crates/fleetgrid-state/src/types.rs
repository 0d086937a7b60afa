//! Domain records for the FleetGrid state store.
//!
//! These types represent the persisted state of targets, the software
//! catalog, actions with their status history, and rollouts. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use redb::TableDefinition;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::store::Record;
use crate::tables::*;

/// Surrogate identifier for catalog entities, actions and rollouts.
pub type EntityId = u64;

/// Device identity, unique within a tenant.
pub type ControllerId = String;

/// Maximum length of a tenant name or controller id.
const MAX_SEGMENT_LEN: usize = 128;

/// Validate a string that becomes part of a composite key.
///
/// Allows ASCII alphanumerics plus `-`, `_`, `.` and `:`; the `/`
/// separator is never allowed.
pub fn validate_key_segment(kind: &str, value: &str) -> StateResult<()> {
    if value.is_empty() || value.len() > MAX_SEGMENT_LEN {
        return Err(StateError::InvalidKey(format!(
            "{kind} must be 1..={MAX_SEGMENT_LEN} characters"
        )));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(StateError::InvalidKey(format!(
            "{kind} '{value}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Zero-padded id used inside composite keys.
pub fn id_key(id: EntityId) -> String {
    format!("{id:020}")
}

// ── Tenant ─────────────────────────────────────────────────────────

/// Explicit tenant context threaded through every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tenant(String);

impl Tenant {
    pub fn new(name: &str) -> StateResult<Self> {
        validate_key_segment("tenant", name)?;
        Ok(Self(name.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every key this tenant owns in a table.
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Tenant {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tenant::new(&value)
    }
}

impl From<Tenant> for String {
    fn from(t: Tenant) -> Self {
        t.0
    }
}

/// Creation/modification timestamps (epoch ms) and optimistic version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub created_at: u64,
    pub last_modified_at: u64,
    /// Bumped by every successful `WriteTxn::update`; 0 before insert.
    pub version: u64,
}

impl Audit {
    pub fn new(now: u64) -> Self {
        Self {
            created_at: now,
            last_modified_at: now,
            version: 0,
        }
    }

    pub fn touch(&mut self, now: u64) {
        self.last_modified_at = now;
    }
}

// ── Target ─────────────────────────────────────────────────────────

/// Aggregate update status of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetUpdateStatus {
    /// Created by an operator, never seen polling.
    Unknown,
    /// Has polled at least once, nothing assigned.
    Registered,
    Pending,
    InSync,
    Error,
}

/// Auto-confirmation state recorded on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoConfirmation {
    pub initiator: Option<String>,
    pub remark: Option<String>,
    pub activated_at: u64,
}

/// A managed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub tenant: Tenant,
    pub controller_id: ControllerId,
    pub name: String,
    pub description: Option<String>,
    pub update_status: TargetUpdateStatus,
    /// Desired distribution set.
    pub assigned_ds: Option<EntityId>,
    /// Last distribution set confirmed installed.
    pub installed_ds: Option<EntityId>,
    pub installed_at: Option<u64>,
    pub last_query_at: Option<u64>,
    /// Terminal status of the most recently completed action, cleared on
    /// each new assignment.
    pub last_outcome: Option<ActionStatus>,
    /// Attributes reported by the device itself.
    pub attributes: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    pub auto_confirm: Option<AutoConfirmation>,
    pub audit: Audit,
}

impl Target {
    pub fn key_for(tenant: &Tenant, controller_id: &str) -> String {
        format!("{tenant}/{controller_id}")
    }
}

// ── Catalog ────────────────────────────────────────────────────────

/// Kind of software module (OS, application, firmware, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareModuleType {
    pub tenant: Tenant,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    /// How many modules of this type one distribution set may hold.
    pub max_assignments: u32,
    pub audit: Audit,
}

impl SoftwareModuleType {
    pub fn key_for(tenant: &Tenant, key: &str) -> String {
        format!("{tenant}/{key}")
    }
}

/// Defines which module types a distribution set must/may contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSetType {
    pub tenant: Tenant,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub mandatory: BTreeSet<String>,
    pub optional: BTreeSet<String>,
    pub audit: Audit,
}

impl DistributionSetType {
    pub fn key_for(tenant: &Tenant, key: &str) -> String {
        format!("{tenant}/{key}")
    }

    pub fn allows(&self, module_type: &str) -> bool {
        self.mandatory.contains(module_type) || self.optional.contains(module_type)
    }
}

/// A content-hashed binary inside a software module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
    pub size: u64,
    pub created_at: u64,
}

/// A typed component of a distribution set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareModule {
    pub tenant: Tenant,
    pub id: EntityId,
    pub module_type: String,
    pub name: String,
    pub version: String,
    pub vendor: Option<String>,
    pub description: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub metadata: BTreeMap<String, String>,
    /// Soft-deleted: kept because a locked set or an action still refers to it.
    pub deleted: bool,
    pub audit: Audit,
}

impl SoftwareModule {
    pub fn key_for(tenant: &Tenant, id: EntityId) -> String {
        format!("{tenant}/{}", id_key(id))
    }
}

/// A versioned bundle of software modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSet {
    pub tenant: Tenant,
    pub id: EntityId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub set_type: String,
    pub modules: BTreeSet<EntityId>,
    /// Every mandatory module type is present.
    pub complete: bool,
    /// Set once the first action references this set; composition is frozen.
    pub locked: bool,
    pub deleted: bool,
    pub metadata: BTreeMap<String, String>,
    pub audit: Audit,
}

impl DistributionSet {
    pub fn key_for(tenant: &Tenant, id: EntityId) -> String {
        format!("{tenant}/{}", id_key(id))
    }
}

// ── Actions ────────────────────────────────────────────────────────

/// How urgently a device must apply an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Forced,
    Soft,
    /// Soft until `forced_time`, forced afterwards.
    TimeForced,
    DownloadOnly,
}

/// Action status codes, used both for an action's current status and
/// for the rows of its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Scheduled,
    Running,
    Retrieved,
    Download,
    Downloaded,
    Warning,
    WaitForConfirmation,
    Canceling,
    Finished,
    Error,
    Canceled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }
}

/// Back-reference from an action to the rollout group that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub rollout_id: EntityId,
    pub group_id: EntityId,
}

/// One unit of work assigning a distribution set to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub tenant: Tenant,
    pub id: EntityId,
    pub controller_id: ControllerId,
    /// Never changes after creation.
    pub distribution_set: EntityId,
    pub action_type: ActionType,
    /// Epoch ms; only meaningful for `TimeForced`.
    pub forced_time: Option<u64>,
    pub status: ActionStatus,
    pub active: bool,
    pub rollout_group: Option<GroupRef>,
    /// The device has fetched the deployment resource at least once.
    pub retrieved: bool,
    pub audit: Audit,
}

impl Action {
    pub fn key_for(tenant: &Tenant, id: EntityId) -> String {
        format!("{tenant}/{}", id_key(id))
    }

    pub fn target_index_key(&self) -> String {
        format!("{}/{}/{}", self.tenant, self.controller_id, id_key(self.id))
    }

    pub fn group_index_key(&self) -> Option<String> {
        self.rollout_group.map(|g| {
            format!("{}/{}/{}", self.tenant, id_key(g.group_id), id_key(self.id))
        })
    }

    pub fn target_index_prefix(tenant: &Tenant, controller_id: &str) -> String {
        format!("{tenant}/{controller_id}/")
    }

    pub fn group_index_prefix(tenant: &Tenant, group_id: EntityId) -> String {
        format!("{tenant}/{}/", id_key(group_id))
    }
}

/// Immutable history row of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStatusEntry {
    pub tenant: Tenant,
    pub action_id: EntityId,
    pub id: EntityId,
    pub status: ActionStatus,
    pub messages: Vec<String>,
    pub occurred_at: u64,
}

impl ActionStatusEntry {
    pub fn prefix_for(tenant: &Tenant, action_id: EntityId) -> String {
        format!("{tenant}/{}/", id_key(action_id))
    }
}

// ── Rollouts ───────────────────────────────────────────────────────

/// Campaign lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Creating,
    WaitingForApproval,
    ApprovalDenied,
    Ready,
    Starting,
    Running,
    Paused,
    Finished,
    Error,
}

/// Group lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutGroupStatus {
    Scheduled,
    Ready,
    Running,
    Finished,
    Error,
}

impl RolloutGroupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

/// What happens when a group's success threshold is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessAction {
    NextGroup,
}

/// What happens when a group's error threshold is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    Pause,
}

/// Operator decision on a rollout waiting for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub decided_by: Option<String>,
    pub remark: Option<String>,
    pub decided_at: u64,
}

/// A staged campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    pub tenant: Tenant,
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
    pub target_filter: String,
    pub distribution_set: EntityId,
    pub action_type: ActionType,
    pub forced_time: Option<u64>,
    pub status: RolloutStatus,
    /// Matched population at creation (grows only under the join policy).
    pub total_targets: u64,
    /// Auto-start time (epoch ms) for a READY rollout.
    pub start_at: Option<u64>,
    pub approval: Option<ApprovalDecision>,
    /// Last group validation failure while in CREATING.
    pub last_error: Option<String>,
    pub audit: Audit,
}

impl Rollout {
    pub fn key_for(tenant: &Tenant, id: EntityId) -> String {
        format!("{tenant}/{}", id_key(id))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RolloutStatus::Finished | RolloutStatus::Error | RolloutStatus::ApprovalDenied
        )
    }
}

/// An ordered partition of a rollout's population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutGroup {
    pub tenant: Tenant,
    pub rollout_id: EntityId,
    pub id: EntityId,
    pub position: u32,
    pub name: String,
    pub description: Option<String>,
    /// Sub-filter, ANDed with the rollout filter.
    pub target_filter: Option<String>,
    pub target_percentage: f64,
    /// Percentage of finished actions that completes the group.
    pub success_threshold: u8,
    pub success_action: SuccessAction,
    /// Percentage of errored actions that fires the error action.
    pub error_threshold: u8,
    pub error_action: ErrorAction,
    pub status: RolloutGroupStatus,
    pub targets: Vec<ControllerId>,
    /// The error action already fired once for this group.
    pub error_action_fired: bool,
    pub audit: Audit,
}

impl RolloutGroup {
    pub fn key_for(tenant: &Tenant, rollout_id: EntityId, id: EntityId) -> String {
        format!("{tenant}/{}/{}", id_key(rollout_id), id_key(id))
    }

    pub fn prefix_for(tenant: &Tenant, rollout_id: EntityId) -> String {
        format!("{tenant}/{}/", id_key(rollout_id))
    }

    pub fn group_ref(&self) -> GroupRef {
        GroupRef {
            rollout_id: self.rollout_id,
            group_id: self.id,
        }
    }
}

// ── Record impls ───────────────────────────────────────────────────

/// Implement `Record` for a type carrying an `audit` field.
macro_rules! versioned_record {
    ($ty:ty, $table:expr, |$r:ident| $key:expr) => {
        impl Record for $ty {
            const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = $table;

            fn table_key(&self) -> String {
                let $r = self;
                $key
            }

            fn audit(&self) -> Option<&Audit> {
                Some(&self.audit)
            }

            fn audit_mut(&mut self) -> Option<&mut Audit> {
                Some(&mut self.audit)
            }
        }
    };
}

versioned_record!(Target, TARGETS, |r| Target::key_for(&r.tenant, &r.controller_id));
versioned_record!(SoftwareModuleType, MODULE_TYPES, |r| {
    SoftwareModuleType::key_for(&r.tenant, &r.key)
});
versioned_record!(DistributionSetType, SET_TYPES, |r| {
    DistributionSetType::key_for(&r.tenant, &r.key)
});
versioned_record!(SoftwareModule, MODULES, |r| SoftwareModule::key_for(&r.tenant, r.id));
versioned_record!(DistributionSet, DISTRIBUTION_SETS, |r| {
    DistributionSet::key_for(&r.tenant, r.id)
});
versioned_record!(Action, ACTIONS, |r| Action::key_for(&r.tenant, r.id));
versioned_record!(Rollout, ROLLOUTS, |r| Rollout::key_for(&r.tenant, r.id));
versioned_record!(RolloutGroup, ROLLOUT_GROUPS, |r| {
    RolloutGroup::key_for(&r.tenant, r.rollout_id, r.id)
});

impl Record for ActionStatusEntry {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = ACTION_STATUS;

    fn table_key(&self) -> String {
        format!("{}{}", Self::prefix_for(&self.tenant, self.action_id), id_key(self.id))
    }
}
