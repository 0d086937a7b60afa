//! FleetGrid rollouts — staged campaigns over large target populations.
//!
//! A rollout assigns one distribution set to every target matching a
//! filter, one group at a time. Each group has success and error
//! thresholds; the scheduler starts the next group once the current one
//! succeeds and pauses the rollout when too many of its actions fail.
//!
//! # Components
//!
//! - **`strategy`** — Group layouts (simple split, advanced definitions)
//! - **`groups`** — Partitioning and validation of the target population
//! - **`controller`** — Pure planning of the next rollout step
//! - **`scheduler`** — Lifecycle transitions and the advancement pass
//! - **`locks`** — Per-rollout mutual exclusion for advancement
//! - **`sweep`** — Periodic advancement loop

pub mod controller;
pub mod error;
pub mod groups;
pub mod locks;
pub mod scheduler;
pub mod strategy;
pub mod sweep;

#[cfg(test)]
mod testing;

pub use controller::{GroupProgress, Step};
pub use error::{RolloutError, RolloutResult};
pub use groups::GroupsValidation;
pub use locks::RolloutLocks;
pub use scheduler::{AdvanceReport, GroupProgressView, RolloutScheduler, SweepReport};
pub use strategy::{ApprovalRequest, GroupDefinition, GroupStrategy, NewRollout};
pub use sweep::RolloutSweeper;
