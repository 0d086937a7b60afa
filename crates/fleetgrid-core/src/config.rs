//! fleet.toml configuration parser.

use std::path::Path;

use fleetgrid_state::RetryPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub quota: QuotaConfig,
    pub polling: PollingConfig,
    pub actions: ActionsConfig,
    pub rollout: RolloutConfig,
    pub retry: RetryPolicy,
}

/// Upper bounds on counted resources per parent entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub max_artifacts_per_module: u64,
    /// Bytes.
    pub max_artifact_size: u64,
    pub max_metadata_per_entity: u64,
    pub max_attributes_per_target: u64,
    pub max_modules_per_distribution_set: u64,
    pub max_groups_per_rollout: u64,
    pub max_targets_per_group: u64,
    pub max_status_entries_per_action: u64,
    pub max_messages_per_status: u64,
    /// No limit when unset.
    pub max_active_actions_per_target: Option<u64>,
    pub max_targets_per_assignment: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_artifacts_per_module: 50,
            max_artifact_size: 1024 * 1024 * 1024,
            max_metadata_per_entity: 100,
            max_attributes_per_target: 100,
            max_modules_per_distribution_set: 100,
            max_groups_per_rollout: 500,
            max_targets_per_group: 20_000,
            max_status_entries_per_action: 1000,
            max_messages_per_status: 50,
            max_active_actions_per_target: None,
            max_targets_per_assignment: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Sleep interval suggested to devices in the polling envelope.
    pub sleep_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { sleep_secs: 300 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// New actions wait for device (or auto) confirmation before running.
    pub user_confirmation_required: bool,
}

/// What happens to targets that start matching a rollout's filter after
/// its groups were built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateTargetPolicy {
    /// The population is frozen at creation.
    #[default]
    Exclude,
    /// Newly matching targets join the last group while it is not terminal.
    JoinLastGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub approval_required: bool,
    /// Percent of finished actions that completes a group.
    pub default_success_threshold: u8,
    /// Percent of errored actions that fires a group's error action.
    pub default_error_threshold: u8,
    pub sweep_interval_secs: u64,
    pub late_target_policy: LateTargetPolicy,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            approval_required: false,
            default_success_threshold: 100,
            default_error_threshold: 50,
            sweep_interval_secs: 10,
            late_target_policy: LateTargetPolicy::Exclude,
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
