//! Shared fixtures for scheduler tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use fleetgrid_core::actions::{ExecutionPhase, Feedback, FeedbackResult};
use fleetgrid_core::catalog::{NewDistributionSet, NewModule, NewModuleType, NewSetType};
use fleetgrid_core::registry::NewTarget;
use fleetgrid_core::{CoreContext, FleetConfig, FleetServices};
use fleetgrid_state::{
    Action, ActionType, DistributionSet, EntityId, ManualClock, StateStore, Tenant,
};

use crate::scheduler::RolloutScheduler;
use crate::strategy::{GroupStrategy, NewRollout};

pub fn tenant() -> Tenant {
    Tenant::new("default").unwrap()
}

pub struct Fixture {
    pub services: FleetServices,
    pub scheduler: RolloutScheduler,
    pub clock: Arc<ManualClock>,
}

pub fn fixture_with(configure: impl FnOnce(&mut FleetConfig)) -> Fixture {
    let mut config = FleetConfig::default();
    config.retry.base_backoff_ms = 0;
    config.retry.max_backoff_ms = 0;
    configure(&mut config);
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = StateStore::open_in_memory().unwrap();
    let ctx = CoreContext::new(store, clock.clone(), config);
    Fixture {
        services: FleetServices::new(ctx.clone()),
        scheduler: RolloutScheduler::new(ctx),
        clock,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

impl Fixture {
    pub fn create_targets(&self, prefix: &str, count: usize) {
        for i in 0..count {
            self.create_target(&format!("{prefix}-{i:02}"));
        }
    }

    pub fn create_target(&self, controller_id: &str) {
        self.services
            .targets
            .create(
                &tenant(),
                &NewTarget {
                    controller_id: controller_id.to_string(),
                    name: None,
                    description: None,
                },
            )
            .unwrap();
    }

    /// A complete single-module set.
    pub fn create_set(&self) -> DistributionSet {
        let catalog = &self.services.catalog;
        catalog
            .create_module_type(
                &tenant(),
                &NewModuleType {
                    key: "os".into(),
                    name: "OS".into(),
                    description: None,
                    max_assignments: None,
                },
            )
            .unwrap();
        catalog
            .create_set_type(
                &tenant(),
                &NewSetType {
                    key: "os_only".into(),
                    name: "OS only".into(),
                    description: None,
                    mandatory: BTreeSet::from(["os".to_string()]),
                    optional: BTreeSet::new(),
                },
            )
            .unwrap();
        let module = catalog
            .create_module(
                &tenant(),
                &NewModule {
                    module_type: "os".into(),
                    name: "firmware".into(),
                    version: "2.0".into(),
                    vendor: None,
                    description: None,
                },
            )
            .unwrap();
        catalog
            .create_set(
                &tenant(),
                &NewDistributionSet {
                    name: "firmware".into(),
                    version: "2.0".into(),
                    description: None,
                    set_type: "os_only".into(),
                    modules: vec![module.id],
                },
            )
            .unwrap()
    }

    pub fn request(&self, name: &str, ds: EntityId, groups: GroupStrategy) -> NewRollout {
        NewRollout {
            name: name.into(),
            description: None,
            target_filter: "controllerid==dev-*".into(),
            distribution_set: ds,
            action_type: ActionType::Forced,
            forced_time: None,
            start_at: None,
            groups,
        }
    }

    pub fn group_actions(&self, group_id: EntityId) -> Vec<Action> {
        let ctx = &self.services.ctx;
        ctx.read(|r| fleetgrid_core::actions::group_actions_in(r, &tenant(), group_id))
            .unwrap()
    }

    /// Close every action of a group with the given result.
    pub fn close_group(&self, group_id: EntityId, result: FeedbackResult) {
        for action in self.group_actions(group_id) {
            self.close(&action, result);
        }
    }

    pub fn close(&self, action: &Action, result: FeedbackResult) {
        self.services
            .actions
            .ingest_feedback(
                &tenant(),
                &action.controller_id,
                action.id,
                &Feedback {
                    execution: ExecutionPhase::Closed,
                    result: Some(result),
                    messages: Vec::new(),
                },
            )
            .unwrap();
    }
}

pub fn simple(amount: u32) -> GroupStrategy {
    GroupStrategy::Simple {
        amount,
        success_threshold: None,
        error_threshold: None,
    }
}
