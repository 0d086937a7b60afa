//! Error taxonomy of the FleetGrid engine.

use std::fmt;

use fleetgrid_state::{Retryable, StateError};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("quota exceeded: {resource} of {parent} would reach {requested_total}, limit is {limit}")]
    QuotaExceeded {
        resource: &'static str,
        parent: String,
        requested_total: u64,
        limit: u64,
    },

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("entity is read-only: {0}")]
    ReadOnly(String),

    #[error("concurrent modification: {0}")]
    ConcurrencyConflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict { .. } => Self::ConcurrencyConflict(e.to_string()),
            StateError::NotFound(key) => Self::NotFound {
                kind: "record",
                id: key,
            },
            StateError::AlreadyExists(key) => Self::AlreadyExists {
                kind: "record",
                id: key,
            },
            StateError::InvalidKey(msg) => Self::Validation(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl Retryable for EngineError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict: EngineError = StateError::Conflict {
            key: "k".into(),
            expected: 1,
            found: 2,
        }
        .into();
        assert!(conflict.is_retryable());
        assert!(!EngineError::not_found("target", "x").is_retryable());
        assert!(!EngineError::Storage("disk".into()).is_retryable());
    }

    #[test]
    fn invalid_key_is_a_validation_failure() {
        let err: EngineError = StateError::InvalidKey("bad".into()).into();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
