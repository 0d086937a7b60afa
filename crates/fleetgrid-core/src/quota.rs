//! Quota Guard.
//!
//! A stateless predicate called inside the write transaction of the
//! mutation it guards, after counting the children of `parent` in that same
//! transaction. A rejected request is rejected as a whole.

use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Ok if `current + requested <= limit`, `QuotaExceeded` otherwise.
pub fn check_and_reserve(
    resource: &'static str,
    parent: &str,
    current: usize,
    requested: usize,
    limit: u64,
) -> EngineResult<()> {
    let total = (current as u64).saturating_add(requested as u64);
    if total > limit {
        warn!(
            resource,
            parent,
            current,
            requested,
            limit,
            "quota exceeded"
        );
        return Err(EngineError::QuotaExceeded {
            resource,
            parent: parent.to_string(),
            requested_total: total,
            limit,
        });
    }
    Ok(())
}
