//! fleetgrid-state — embedded state store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides transactional
//! persistence for targets, software modules, distribution sets, actions,
//! action status history, rollouts and rollout groups.
//!
//! # Architecture
//!
//! All domain records are JSON-serialized into redb's `&[u8]` value
//! columns. Every key starts with the owning tenant (`{tenant}/...`), and
//! surrogate ids are zero-padded so prefix scans come back in creation
//! order. Secondary index tables map `{tenant}/{parent}/{child}` keys to
//! child ids.
//!
//! Mutations happen inside [`WriteTxn`] closures passed to
//! [`StateStore::write`]; an error returned from the closure aborts the
//! whole transaction. Mutable records carry an [`Audit`] block whose
//! `version` is checked and bumped by [`WriteTxn::update`], which is what
//! callers planning from an older read snapshot rely on to detect
//! concurrent writers.

pub mod clock;
pub mod error;
pub mod retry;
pub mod store;
pub mod tables;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StateError, StateResult};
pub use retry::{RetryPolicy, Retryable, retry};
pub use store::{ReadTxn, Reader, Record, StateStore, WriteTxn};
pub use types::*;
