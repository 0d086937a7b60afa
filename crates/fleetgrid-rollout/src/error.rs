use fleetgrid_core::EngineError;
use fleetgrid_state::{EntityId, Retryable, StateError};

use crate::groups::GroupsValidation;

/// Errors from rollout scheduling.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The group layout does not cover the target population. When the
    /// rollout was persisted anyway it stays in CREATING.
    #[error("invalid group definition: {}", .validation.error.as_deref().unwrap_or("unknown"))]
    GroupValidation {
        rollout_id: Option<EntityId>,
        validation: GroupsValidation,
    },
}

impl From<StateError> for RolloutError {
    fn from(e: StateError) -> Self {
        Self::Engine(e.into())
    }
}

impl Retryable for RolloutError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Engine(EngineError::ConcurrencyConflict(_)))
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
