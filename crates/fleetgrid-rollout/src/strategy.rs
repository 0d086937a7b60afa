//! How a rollout's target population is split into groups.

use serde::{Deserialize, Serialize};

use fleetgrid_state::{ActionType, EntityId};

/// Group layout requested by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum GroupStrategy {
    /// Split the matched targets evenly into `amount` groups. The last
    /// group absorbs the rounding remainder.
    Simple {
        amount: u32,
        #[serde(default)]
        success_threshold: Option<u8>,
        #[serde(default)]
        error_threshold: Option<u8>,
    },
    /// Explicit, ordered group definitions.
    Advanced { groups: Vec<GroupDefinition> },
}

impl GroupStrategy {
    pub fn group_count(&self) -> usize {
        match self {
            Self::Simple { amount, .. } => *amount as usize,
            Self::Advanced { groups } => groups.len(),
        }
    }
}

/// One group in advanced mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Narrows the rollout filter for this group.
    #[serde(default)]
    pub target_filter: Option<String>,
    /// Share (0-100) of the still-ungrouped matching targets taken by
    /// this group.
    #[serde(default = "full_share")]
    pub target_percentage: f64,
    #[serde(default)]
    pub success_threshold: Option<u8>,
    #[serde(default)]
    pub error_threshold: Option<u8>,
}

fn full_share() -> f64 {
    100.0
}

/// Operator request to create a rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRollout {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target_filter: String,
    pub distribution_set: EntityId,
    #[serde(default = "default_action_type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub forced_time: Option<u64>,
    /// Epoch millis at which the sweep starts the rollout on its own.
    #[serde(default)]
    pub start_at: Option<u64>,
    pub groups: GroupStrategy,
}

fn default_action_type() -> ActionType {
    ActionType::Forced
}

/// Operator decision on a rollout waiting for approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}
