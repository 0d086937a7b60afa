//! Per-rollout mutual exclusion for advancement passes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use fleetgrid_state::{EntityId, Tenant};

type Key = (Tenant, EntityId);

/// Set of rollouts with an advancement pass in flight.
///
/// Passes on the same rollout never overlap; a second caller skips
/// instead of waiting. Lock hold time is one pass.
#[derive(Debug, Clone, Default)]
pub struct RolloutLocks {
    held: Arc<Mutex<HashSet<Key>>>,
}

impl RolloutLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for a rollout, or `None` if a pass already holds it.
    pub fn try_acquire(&self, tenant: &Tenant, rollout_id: EntityId) -> Option<RolloutLockGuard> {
        let key = (tenant.clone(), rollout_id);
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(RolloutLockGuard {
            locks: self.clone(),
            key,
        })
    }

    pub fn is_held(&self, tenant: &Tenant, rollout_id: EntityId) -> bool {
        self.lock().contains(&(tenant.clone(), rollout_id))
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Key>> {
        // The set stays consistent even if a holder panicked.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the rollout lock on drop.
#[derive(Debug)]
pub struct RolloutLockGuard {
    locks: RolloutLocks,
    key: Key,
}

impl Drop for RolloutLockGuard {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.key);
    }
}
