//! redb table definitions for the FleetGrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized
//! records). Index tables map composite keys to child ids. Every key is
//! prefixed with the tenant name.

use redb::TableDefinition;

/// Targets keyed by `{tenant}/{controller_id}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Software module types keyed by `{tenant}/{key}`.
pub const MODULE_TYPES: TableDefinition<&str, &[u8]> = TableDefinition::new("module_types");

/// Distribution set types keyed by `{tenant}/{key}`.
pub const SET_TYPES: TableDefinition<&str, &[u8]> = TableDefinition::new("set_types");

/// Software modules keyed by `{tenant}/{id:020}`.
pub const MODULES: TableDefinition<&str, &[u8]> = TableDefinition::new("modules");

/// Distribution sets keyed by `{tenant}/{id:020}`.
pub const DISTRIBUTION_SETS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("distribution_sets");

/// Actions keyed by `{tenant}/{id:020}`.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Append-only action status rows keyed by `{tenant}/{action_id:020}/{id:020}`.
pub const ACTION_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("action_status");

/// Rollouts keyed by `{tenant}/{id:020}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Rollout groups keyed by `{tenant}/{rollout_id:020}/{id:020}`.
pub const ROLLOUT_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollout_groups");

/// Artifact binaries keyed by `{tenant}/{sha256}`.
pub const ARTIFACT_BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("artifact_blobs");

/// Action ids per target, keyed by `{tenant}/{controller_id}/{action_id:020}`.
pub const ACTIONS_BY_TARGET: TableDefinition<&str, u64> =
    TableDefinition::new("actions_by_target");

/// Action ids per rollout group, keyed by `{tenant}/{group_id:020}/{action_id:020}`.
pub const ACTIONS_BY_GROUP: TableDefinition<&str, u64> = TableDefinition::new("actions_by_group");

/// Id sequences keyed by `{tenant}/{kind}`.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
