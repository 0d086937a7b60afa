//! Shared fixtures for unit tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use fleetgrid_state::{
    Action, ActionType, DistributionSet, EntityId, ManualClock, SoftwareModule, StateStore,
    Target, Tenant,
};

use crate::actions::AssignRequest;
use crate::catalog::{NewDistributionSet, NewModule, NewModuleType, NewSetType};
use crate::config::FleetConfig;
use crate::context::CoreContext;
use crate::registry::NewTarget;
use crate::FleetServices;

pub fn tenant() -> Tenant {
    Tenant::new("default").unwrap()
}

pub struct Fixture {
    pub ctx: CoreContext,
    pub services: FleetServices,
    pub clock: Arc<ManualClock>,
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
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
        ctx,
        clock,
    }
}

impl Fixture {
    pub fn create_target(&self, controller_id: &str) -> Target {
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
            .unwrap()
    }

    /// Module types `os` and `app`, set type `os_app` (os mandatory, app optional).
    pub fn create_types(&self) {
        let catalog = &self.services.catalog;
        for key in ["os", "app"] {
            catalog
                .create_module_type(
                    &tenant(),
                    &NewModuleType {
                        key: key.to_string(),
                        name: key.to_uppercase(),
                        description: None,
                        max_assignments: None,
                    },
                )
                .unwrap();
        }
        catalog
            .create_set_type(
                &tenant(),
                &NewSetType {
                    key: "os_app".to_string(),
                    name: "OS with apps".to_string(),
                    description: None,
                    mandatory: BTreeSet::from(["os".to_string()]),
                    optional: BTreeSet::from(["app".to_string()]),
                },
            )
            .unwrap();
    }

    pub fn create_module(&self, module_type: &str, name: &str, version: &str) -> SoftwareModule {
        self.services
            .catalog
            .create_module(
                &tenant(),
                &NewModule {
                    module_type: module_type.to_string(),
                    name: name.to_string(),
                    version: version.to_string(),
                    vendor: None,
                    description: None,
                },
            )
            .unwrap()
    }

    /// A complete `os_app` set holding one fresh `os` module.
    pub fn create_set(&self, name: &str, version: &str) -> DistributionSet {
        let os = self.create_module("os", &format!("{name}-os"), version);
        self.services
            .catalog
            .create_set(
                &tenant(),
                &NewDistributionSet {
                    name: name.to_string(),
                    version: version.to_string(),
                    description: None,
                    set_type: "os_app".to_string(),
                    modules: vec![os.id],
                },
            )
            .unwrap()
    }

    pub fn assign(&self, controller_id: &str, ds: EntityId, action_type: ActionType) -> Action {
        self.services
            .actions
            .assign(
                &tenant(),
                &AssignRequest {
                    controller_id: controller_id.to_string(),
                    distribution_set: ds,
                    action_type,
                    forced_time: None,
                },
            )
            .unwrap()
    }
}
