//! fleetgrid-core — the FleetGrid update engine.
//!
//! Tracks devices (targets), the software catalog they are updated from,
//! and the actions that assign a distribution set to a target. Every
//! operation takes an explicit [`Tenant`](fleetgrid_state::Tenant) and runs
//! in one store transaction, retried on optimistic-version conflicts.
//!
//! # Components
//!
//! - [`quota`] — limits checked inside the guarded transaction
//! - [`registry::TargetRegistry`] — targets, attributes, update status
//! - [`catalog::DistributionCatalog`] — types, modules, artifacts, sets
//! - [`actions::ActionEngine`] — assignment, state machine, device protocol
//! - [`confirmation::ConfirmationGate`] — auto-confirmation per target

pub mod actions;
pub mod catalog;
pub mod config;
pub mod confirmation;
pub mod context;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod quota;
pub mod registry;

#[cfg(test)]
mod testing;

pub use actions::ActionEngine;
pub use catalog::DistributionCatalog;
pub use config::{FleetConfig, LateTargetPolicy};
pub use confirmation::ConfirmationGate;
pub use context::CoreContext;
pub use error::{EngineError, EngineResult};
pub use filter::TargetFilter;
pub use registry::TargetRegistry;

/// All core services sharing one store, clock and configuration.
#[derive(Clone)]
pub struct FleetServices {
    pub ctx: CoreContext,
    pub targets: TargetRegistry,
    pub catalog: DistributionCatalog,
    pub actions: ActionEngine,
    pub confirmation: ConfirmationGate,
}

impl FleetServices {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            targets: TargetRegistry::new(ctx.clone()),
            catalog: DistributionCatalog::new(ctx.clone()),
            actions: ActionEngine::new(ctx.clone()),
            confirmation: ConfirmationGate::new(ctx.clone()),
            ctx,
        }
    }
}
