//! Shared handles every FleetGrid service is built from.

use std::sync::Arc;

use fleetgrid_state::{Clock, ReadTxn, StateStore, WriteTxn, retry};

use crate::config::FleetConfig;
use crate::error::EngineResult;

#[derive(Clone)]
pub struct CoreContext {
    pub store: StateStore,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<FleetConfig>,
}

impl CoreContext {
    pub fn new(store: StateStore, clock: Arc<dyn Clock>, config: FleetConfig) -> Self {
        Self {
            store,
            clock,
            config: Arc::new(config),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn read<T>(&self, f: impl FnOnce(&ReadTxn) -> EngineResult<T>) -> EngineResult<T> {
        self.store.read(f)
    }

    /// Run `f` in a write transaction, re-running the whole transaction on
    /// concurrency conflicts as configured in `[retry]`.
    pub fn write<T>(&self, op: &str, f: impl Fn(&WriteTxn) -> EngineResult<T>) -> EngineResult<T> {
        retry(&self.config.retry, op, || self.store.write(&f))
    }
}
