//! Target Registry — device identity, assignment references and the
//! aggregate update status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleetgrid_state::tables::{ACTIONS_BY_GROUP, ACTIONS_BY_TARGET};
use fleetgrid_state::{
    Action, ActionStatus, ActionStatusEntry, Audit, Reader, Target, TargetUpdateStatus, Tenant,
    WriteTxn, validate_key_segment,
};

use crate::actions::target_actions_in;
use crate::context::CoreContext;
use crate::error::{EngineError, EngineResult};
use crate::filter::TargetFilter;
use crate::metadata::{self, MetadataEntry};
use crate::quota;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTarget {
    pub controller_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// How device-reported attributes are combined with the stored ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeUpdateMode {
    #[default]
    Merge,
    Replace,
    Remove,
}

pub fn target_in(r: &impl Reader, tenant: &Tenant, controller_id: &str) -> EngineResult<Target> {
    r.get::<Target>(&Target::key_for(tenant, controller_id))?
        .ok_or_else(|| EngineError::not_found("target", controller_id))
}

pub fn matching_targets_in(
    r: &impl Reader,
    tenant: &Tenant,
    filter: &TargetFilter,
) -> EngineResult<Vec<Target>> {
    let targets: Vec<Target> = r.scan(&tenant.prefix())?;
    Ok(targets.into_iter().filter(|t| filter.matches(t)).collect())
}

/// Recompute `assigned_ds` and `update_status` from the target's actions.
///
/// The newest active action decides the assigned set; with no active
/// action the assigned set is left as the caller set it.
pub fn refresh_status_in(r: &impl Reader, target: &mut Target) -> EngineResult<()> {
    let actions = target_actions_in(r, &target.tenant, &target.controller_id)?;
    let active: Vec<&Action> = actions.iter().filter(|a| a.active).collect();
    if let Some(newest) = active.last() {
        target.assigned_ds = Some(newest.distribution_set);
    }

    let status = if target.last_outcome == Some(ActionStatus::Error) {
        TargetUpdateStatus::Error
    } else if target.assigned_ds.is_none() {
        if target.last_query_at.is_some() {
            TargetUpdateStatus::Registered
        } else {
            TargetUpdateStatus::Unknown
        }
    } else if active.is_empty() && target.assigned_ds == target.installed_ds {
        TargetUpdateStatus::InSync
    } else {
        TargetUpdateStatus::Pending
    };

    if status != target.update_status {
        debug!(
            tenant = %target.tenant,
            controller_id = %target.controller_id,
            from = ?target.update_status,
            to = ?status,
            "target update status changed"
        );
        target.update_status = status;
    }
    Ok(())
}

/// Record a device poll, registering the device on first contact.
pub fn touch_poll_in(
    txn: &WriteTxn,
    tenant: &Tenant,
    controller_id: &str,
    now: u64,
) -> EngineResult<Target> {
    validate_key_segment("controller id", controller_id)?;
    match txn.get::<Target>(&Target::key_for(tenant, controller_id))? {
        Some(mut target) => {
            target.last_query_at = Some(now);
            target.audit.touch(now);
            refresh_status_in(txn, &mut target)?;
            txn.update(&mut target)?;
            Ok(target)
        }
        None => {
            let mut target = Target {
                tenant: tenant.clone(),
                controller_id: controller_id.to_string(),
                name: controller_id.to_string(),
                description: None,
                update_status: TargetUpdateStatus::Registered,
                assigned_ds: None,
                installed_ds: None,
                installed_at: None,
                last_query_at: Some(now),
                last_outcome: None,
                attributes: BTreeMap::new(),
                metadata: BTreeMap::new(),
                auto_confirm: None,
                audit: Audit::new(now),
            };
            txn.insert(&mut target)?;
            info!(%tenant, controller_id, "target registered on first poll");
            Ok(target)
        }
    }
}

#[derive(Clone)]
pub struct TargetRegistry {
    ctx: CoreContext,
}

impl TargetRegistry {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub fn create(&self, tenant: &Tenant, new: &NewTarget) -> EngineResult<Target> {
        validate_key_segment("controller id", &new.controller_id)?;
        let now = self.ctx.now();
        let target = self.ctx.write("create_target", |txn| {
            let key = Target::key_for(tenant, &new.controller_id);
            if txn.get::<Target>(&key)?.is_some() {
                return Err(EngineError::already_exists("target", &new.controller_id));
            }
            let mut target = Target {
                tenant: tenant.clone(),
                controller_id: new.controller_id.clone(),
                name: new
                    .name
                    .clone()
                    .unwrap_or_else(|| new.controller_id.clone()),
                description: new.description.clone(),
                update_status: TargetUpdateStatus::Unknown,
                assigned_ds: None,
                installed_ds: None,
                installed_at: None,
                last_query_at: None,
                last_outcome: None,
                attributes: BTreeMap::new(),
                metadata: BTreeMap::new(),
                auto_confirm: None,
                audit: Audit::new(now),
            };
            txn.insert(&mut target)?;
            Ok(target)
        })?;
        info!(%tenant, controller_id = %target.controller_id, "target created");
        Ok(target)
    }

    pub fn get(&self, tenant: &Tenant, controller_id: &str) -> EngineResult<Target> {
        self.ctx.read(|r| target_in(r, tenant, controller_id))
    }

    /// All targets of a tenant, optionally narrowed by a filter expression.
    pub fn list(&self, tenant: &Tenant, filter: Option<&str>) -> EngineResult<Vec<Target>> {
        let filter = TargetFilter::parse(filter.unwrap_or(""))?;
        self.ctx.read(|r| matching_targets_in(r, tenant, &filter))
    }

    pub fn update(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        update: &TargetUpdate,
    ) -> EngineResult<Target> {
        let now = self.ctx.now();
        self.ctx.write("update_target", |txn| {
            let mut target = target_in(txn, tenant, controller_id)?;
            if let Some(name) = &update.name {
                target.name = name.clone();
            }
            if let Some(description) = &update.description {
                target.description = Some(description.clone());
            }
            target.audit.touch(now);
            txn.update(&mut target)?;
            Ok(target)
        })
    }

    /// Delete a target together with its actions and their status history.
    pub fn delete(&self, tenant: &Tenant, controller_id: &str) -> EngineResult<()> {
        let removed = self.ctx.write("delete_target", |txn| {
            let target = target_in(txn, tenant, controller_id)?;
            let actions = target_actions_in(txn, tenant, controller_id)?;
            for action in &actions {
                txn.remove_prefix::<ActionStatusEntry>(&ActionStatusEntry::prefix_for(
                    tenant, action.id,
                ))?;
                txn.index_remove(ACTIONS_BY_TARGET, &action.target_index_key())?;
                if let Some(key) = action.group_index_key() {
                    txn.index_remove(ACTIONS_BY_GROUP, &key)?;
                }
                txn.remove::<Action>(&Action::key_for(tenant, action.id))?;
            }
            txn.remove::<Target>(&Target::key_for(tenant, &target.controller_id))?;
            Ok(actions.len())
        })?;
        info!(%tenant, controller_id, actions = removed, "target deleted");
        Ok(())
    }

    /// Apply device-reported attributes (`configData`).
    pub fn update_attributes(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        attributes: &BTreeMap<String, String>,
        mode: AttributeUpdateMode,
    ) -> EngineResult<Target> {
        let now = self.ctx.now();
        let limit = self.ctx.config.quota.max_attributes_per_target;
        self.ctx.write("update_attributes", |txn| {
            let mut target = target_in(txn, tenant, controller_id)?;
            let mut merged = match mode {
                AttributeUpdateMode::Merge => target.attributes.clone(),
                AttributeUpdateMode::Replace => BTreeMap::new(),
                AttributeUpdateMode::Remove => {
                    let mut remaining = target.attributes.clone();
                    for key in attributes.keys() {
                        remaining.remove(key);
                    }
                    remaining
                }
            };
            if mode != AttributeUpdateMode::Remove {
                for (key, value) in attributes {
                    if key.is_empty() {
                        return Err(EngineError::Validation(
                            "attribute key must not be empty".into(),
                        ));
                    }
                    merged.insert(key.clone(), value.clone());
                }
            }
            quota::check_and_reserve("attributes", controller_id, merged.len(), 0, limit)?;
            target.attributes = merged;
            target.audit.touch(now);
            txn.update(&mut target)?;
            Ok(target)
        })
    }

    pub fn metadata(&self, tenant: &Tenant, controller_id: &str) -> EngineResult<Vec<MetadataEntry>> {
        let target = self.get(tenant, controller_id)?;
        Ok(metadata::to_entries(&target.metadata))
    }

    pub fn add_metadata(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        entries: &[MetadataEntry],
    ) -> EngineResult<Vec<MetadataEntry>> {
        self.mutate_metadata(tenant, controller_id, |map, limit| {
            metadata::add_batch(map, entries, controller_id, limit)
        })
    }

    pub fn update_metadata(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        key: &str,
        value: &str,
    ) -> EngineResult<Vec<MetadataEntry>> {
        self.mutate_metadata(tenant, controller_id, |map, _| {
            metadata::update_entry(map, key, value)
        })
    }

    pub fn delete_metadata(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        key: &str,
    ) -> EngineResult<Vec<MetadataEntry>> {
        self.mutate_metadata(tenant, controller_id, |map, _| metadata::remove_entry(map, key))
    }

    fn mutate_metadata(
        &self,
        tenant: &Tenant,
        controller_id: &str,
        f: impl Fn(&mut BTreeMap<String, String>, u64) -> EngineResult<()>,
    ) -> EngineResult<Vec<MetadataEntry>> {
        let now = self.ctx.now();
        let limit = self.ctx.config.quota.max_metadata_per_entity;
        self.ctx.write("target_metadata", |txn| {
            let mut target = target_in(txn, tenant, controller_id)?;
            f(&mut target.metadata, limit)?;
            target.audit.touch(now);
            txn.update(&mut target)?;
            Ok(metadata::to_entries(&target.metadata))
        })
    }
}
