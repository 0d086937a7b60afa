//! Distribution Catalog — module and set types, software modules with their
//! artifacts, and distribution sets.
//!
//! A distribution set is locked the first time an action (or a rollout)
//! references it. From then on its module composition is frozen, and the
//! artifacts of its modules can no longer change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use fleetgrid_state::{
    Artifact, Audit, DistributionSet, DistributionSetType, EntityId, Reader, Record,
    SoftwareModule, SoftwareModuleType, Tenant, WriteTxn,
};

use crate::context::CoreContext;
use crate::error::{EngineError, EngineResult};
use crate::metadata::{self, MetadataEntry};
use crate::quota;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModuleType {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    /// Defaults to 1.
    pub max_assignments: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSetType {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub mandatory: BTreeSet<String>,
    #[serde(default)]
    pub optional: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModule {
    pub module_type: String,
    pub name: String,
    pub version: String,
    pub vendor: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleUpdate {
    pub vendor: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDistributionSet {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub set_type: String,
    #[serde(default)]
    pub modules: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionSetUpdate {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

/// An artifact upload; `sha256`, when given, must match the content.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactUpload<'a> {
    pub filename: &'a str,
    pub content: &'a [u8],
    pub sha256: Option<&'a str>,
    pub overwrite: bool,
}

pub fn module_in(r: &impl Reader, tenant: &Tenant, id: EntityId) -> EngineResult<SoftwareModule> {
    r.get::<SoftwareModule>(&SoftwareModule::key_for(tenant, id))?
        .ok_or_else(|| EngineError::not_found("software module", id))
}

pub fn set_in(r: &impl Reader, tenant: &Tenant, id: EntityId) -> EngineResult<DistributionSet> {
    r.get::<DistributionSet>(&DistributionSet::key_for(tenant, id))?
        .ok_or_else(|| EngineError::not_found("distribution set", id))
}

fn module_type_in(r: &impl Reader, tenant: &Tenant, key: &str) -> EngineResult<SoftwareModuleType> {
    r.get::<SoftwareModuleType>(&SoftwareModuleType::key_for(tenant, key))?
        .ok_or_else(|| EngineError::not_found("software module type", key))
}

fn set_type_in(r: &impl Reader, tenant: &Tenant, key: &str) -> EngineResult<DistributionSetType> {
    r.get::<DistributionSetType>(&DistributionSetType::key_for(tenant, key))?
        .ok_or_else(|| EngineError::not_found("distribution set type", key))
}

/// Load a set for assignment and lock it.
///
/// Deleted sets cannot be assigned; incomplete sets fail validation.
pub fn lock_assignable_set_in(
    txn: &WriteTxn,
    tenant: &Tenant,
    id: EntityId,
    now: u64,
) -> EngineResult<DistributionSet> {
    let mut set = set_in(txn, tenant, id)?;
    if set.deleted {
        return Err(EngineError::InvalidState(format!(
            "distribution set {id} is deleted"
        )));
    }
    if !set.complete {
        return Err(EngineError::Validation(format!(
            "distribution set {id} is incomplete"
        )));
    }
    if !set.locked {
        set.locked = true;
        set.audit.touch(now);
        txn.update(&mut set)?;
        info!(%tenant, distribution_set = id, "distribution set locked");
    }
    Ok(set)
}

fn in_locked_set(r: &impl Reader, tenant: &Tenant, module_id: EntityId) -> EngineResult<bool> {
    let sets: Vec<DistributionSet> = r.scan(&tenant.prefix())?;
    Ok(sets
        .iter()
        .any(|s| s.locked && s.modules.contains(&module_id)))
}

fn blob_key(tenant: &Tenant, sha256: &str) -> String {
    format!("{tenant}/{sha256}")
}

/// Drop a blob once no module of the tenant refers to its hash any more.
fn release_blob_in(txn: &WriteTxn, tenant: &Tenant, sha256: &str) -> EngineResult<()> {
    let modules: Vec<SoftwareModule> = txn.scan(&tenant.prefix())?;
    let referenced = modules
        .iter()
        .any(|m| m.artifacts.iter().any(|a| a.sha256 == sha256));
    if !referenced {
        txn.remove_blob(&blob_key(tenant, sha256))?;
        debug!(%tenant, sha256, "artifact blob released");
    }
    Ok(())
}

/// Check a module list against a set type and the per-type assignment
/// limits; returns whether every mandatory type is covered.
fn validate_composition(
    r: &impl Reader,
    tenant: &Tenant,
    set_type: &DistributionSetType,
    module_ids: &BTreeSet<EntityId>,
) -> EngineResult<bool> {
    let mut per_type: BTreeMap<String, u32> = BTreeMap::new();
    for id in module_ids {
        let module = module_in(r, tenant, *id)?;
        if module.deleted {
            return Err(EngineError::InvalidState(format!(
                "software module {id} is deleted"
            )));
        }
        if !set_type.allows(&module.module_type) {
            return Err(EngineError::Validation(format!(
                "module type '{}' is not allowed in set type '{}'",
                module.module_type, set_type.key
            )));
        }
        *per_type.entry(module.module_type).or_default() += 1;
    }
    for (type_key, count) in &per_type {
        let module_type = module_type_in(r, tenant, type_key)?;
        if *count > module_type.max_assignments {
            return Err(EngineError::Validation(format!(
                "set holds {count} modules of type '{type_key}', at most {} allowed",
                module_type.max_assignments
            )));
        }
    }
    Ok(set_type.mandatory.iter().all(|m| per_type.contains_key(m)))
}

/// Records carrying a metadata map.
trait WithMetadata: Record {
    const KIND: &'static str;
    fn metadata_mut(&mut self) -> &mut BTreeMap<String, String>;
    fn touch(&mut self, now: u64);
}

impl WithMetadata for SoftwareModule {
    const KIND: &'static str = "software module";

    fn metadata_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata
    }

    fn touch(&mut self, now: u64) {
        self.audit.touch(now);
    }
}

impl WithMetadata for DistributionSet {
    const KIND: &'static str = "distribution set";

    fn metadata_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata
    }

    fn touch(&mut self, now: u64) {
        self.audit.touch(now);
    }
}

#[derive(Clone)]
pub struct DistributionCatalog {
    ctx: CoreContext,
}

impl DistributionCatalog {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    // ── Types ──────────────────────────────────────────────────────

    pub fn create_module_type(
        &self,
        tenant: &Tenant,
        new: &NewModuleType,
    ) -> EngineResult<SoftwareModuleType> {
        fleetgrid_state::validate_key_segment("module type key", &new.key)?;
        let max_assignments = new.max_assignments.unwrap_or(1);
        if max_assignments == 0 {
            return Err(EngineError::Validation(
                "max_assignments must be at least 1".into(),
            ));
        }
        let now = self.ctx.now();
        self.ctx.write("create_module_type", |txn| {
            let mut module_type = SoftwareModuleType {
                tenant: tenant.clone(),
                key: new.key.clone(),
                name: new.name.clone(),
                description: new.description.clone(),
                max_assignments,
                audit: Audit::new(now),
            };
            txn.insert(&mut module_type).map_err(|e| match e {
                fleetgrid_state::StateError::AlreadyExists(_) => {
                    EngineError::already_exists("software module type", &new.key)
                }
                other => other.into(),
            })?;
            Ok(module_type)
        })
    }

    pub fn module_types(&self, tenant: &Tenant) -> EngineResult<Vec<SoftwareModuleType>> {
        self.ctx.read(|r| Ok(r.scan(&tenant.prefix())?))
    }

    pub fn module_type(&self, tenant: &Tenant, key: &str) -> EngineResult<SoftwareModuleType> {
        self.ctx.read(|r| module_type_in(r, tenant, key))
    }

    pub fn delete_module_type(&self, tenant: &Tenant, key: &str) -> EngineResult<()> {
        self.ctx.write("delete_module_type", |txn| {
            module_type_in(txn, tenant, key)?;
            let modules: Vec<SoftwareModule> = txn.scan(&tenant.prefix())?;
            let set_types: Vec<DistributionSetType> = txn.scan(&tenant.prefix())?;
            if modules.iter().any(|m| m.module_type == key) || set_types.iter().any(|t| t.allows(key))
            {
                return Err(EngineError::InvalidState(format!(
                    "software module type '{key}' is in use"
                )));
            }
            txn.remove::<SoftwareModuleType>(&SoftwareModuleType::key_for(tenant, key))?;
            Ok(())
        })
    }

    pub fn create_set_type(
        &self,
        tenant: &Tenant,
        new: &NewSetType,
    ) -> EngineResult<DistributionSetType> {
        fleetgrid_state::validate_key_segment("set type key", &new.key)?;
        if let Some(both) = new.mandatory.intersection(&new.optional).next() {
            return Err(EngineError::Validation(format!(
                "module type '{both}' cannot be both mandatory and optional"
            )));
        }
        let now = self.ctx.now();
        self.ctx.write("create_set_type", |txn| {
            for key in new.mandatory.iter().chain(new.optional.iter()) {
                module_type_in(txn, tenant, key)?;
            }
            let mut set_type = DistributionSetType {
                tenant: tenant.clone(),
                key: new.key.clone(),
                name: new.name.clone(),
                description: new.description.clone(),
                mandatory: new.mandatory.clone(),
                optional: new.optional.clone(),
                audit: Audit::new(now),
            };
            txn.insert(&mut set_type).map_err(|e| match e {
                fleetgrid_state::StateError::AlreadyExists(_) => {
                    EngineError::already_exists("distribution set type", &new.key)
                }
                other => other.into(),
            })?;
            Ok(set_type)
        })
    }

    pub fn set_types(&self, tenant: &Tenant) -> EngineResult<Vec<DistributionSetType>> {
        self.ctx.read(|r| Ok(r.scan(&tenant.prefix())?))
    }

    pub fn set_type(&self, tenant: &Tenant, key: &str) -> EngineResult<DistributionSetType> {
        self.ctx.read(|r| set_type_in(r, tenant, key))
    }

    pub fn delete_set_type(&self, tenant: &Tenant, key: &str) -> EngineResult<()> {
        self.ctx.write("delete_set_type", |txn| {
            set_type_in(txn, tenant, key)?;
            let sets: Vec<DistributionSet> = txn.scan(&tenant.prefix())?;
            if sets.iter().any(|s| s.set_type == key) {
                return Err(EngineError::InvalidState(format!(
                    "distribution set type '{key}' is in use"
                )));
            }
            txn.remove::<DistributionSetType>(&DistributionSetType::key_for(tenant, key))?;
            Ok(())
        })
    }

    // ── Software modules ───────────────────────────────────────────

    pub fn create_module(&self, tenant: &Tenant, new: &NewModule) -> EngineResult<SoftwareModule> {
        let now = self.ctx.now();
        let module = self.ctx.write("create_module", |txn| {
            module_type_in(txn, tenant, &new.module_type)?;
            let existing: Vec<SoftwareModule> = txn.scan(&tenant.prefix())?;
            if existing.iter().any(|m| {
                !m.deleted
                    && m.module_type == new.module_type
                    && m.name == new.name
                    && m.version == new.version
            }) {
                return Err(EngineError::already_exists(
                    "software module",
                    format!("{}:{}:{}", new.module_type, new.name, new.version),
                ));
            }
            let mut module = SoftwareModule {
                tenant: tenant.clone(),
                id: txn.next_id(tenant, "module")?,
                module_type: new.module_type.clone(),
                name: new.name.clone(),
                version: new.version.clone(),
                vendor: new.vendor.clone(),
                description: new.description.clone(),
                artifacts: Vec::new(),
                metadata: BTreeMap::new(),
                deleted: false,
                audit: Audit::new(now),
            };
            txn.insert(&mut module)?;
            Ok(module)
        })?;
        info!(%tenant, module_id = module.id, name = %module.name, version = %module.version, "software module created");
        Ok(module)
    }

    pub fn module(&self, tenant: &Tenant, id: EntityId) -> EngineResult<SoftwareModule> {
        self.ctx.read(|r| module_in(r, tenant, id))
    }

    /// Modules that are not soft-deleted.
    pub fn modules(&self, tenant: &Tenant) -> EngineResult<Vec<SoftwareModule>> {
        self.ctx.read(|r| {
            let modules: Vec<SoftwareModule> = r.scan(&tenant.prefix())?;
            Ok(modules.into_iter().filter(|m| !m.deleted).collect())
        })
    }

    pub fn update_module(
        &self,
        tenant: &Tenant,
        id: EntityId,
        update: &ModuleUpdate,
    ) -> EngineResult<SoftwareModule> {
        let now = self.ctx.now();
        self.ctx.write("update_module", |txn| {
            let mut module = module_in(txn, tenant, id)?;
            if let Some(vendor) = &update.vendor {
                module.vendor = Some(vendor.clone());
            }
            if let Some(description) = &update.description {
                module.description = Some(description.clone());
            }
            module.audit.touch(now);
            txn.update(&mut module)?;
            Ok(module)
        })
    }

    /// Delete a module. Modules inside a locked set are only marked deleted;
    /// others are removed from unlocked sets and dropped.
    pub fn delete_module(&self, tenant: &Tenant, id: EntityId) -> EngineResult<()> {
        let now = self.ctx.now();
        let soft = self.ctx.write("delete_module", |txn| {
            let mut module = module_in(txn, tenant, id)?;
            if in_locked_set(txn, tenant, id)? {
                module.deleted = true;
                module.audit.touch(now);
                txn.update(&mut module)?;
                return Ok(true);
            }
            let sets: Vec<DistributionSet> = txn.scan(&tenant.prefix())?;
            for mut set in sets.into_iter().filter(|s| s.modules.contains(&id)) {
                set.modules.remove(&id);
                let set_type = set_type_in(txn, tenant, &set.set_type)?;
                let remaining = set.modules.clone();
                set.complete = validate_composition(txn, tenant, &set_type, &remaining)?;
                set.audit.touch(now);
                txn.update(&mut set)?;
            }
            txn.remove::<SoftwareModule>(&SoftwareModule::key_for(tenant, id))?;
            for artifact in &module.artifacts {
                release_blob_in(txn, tenant, &artifact.sha256)?;
            }
            Ok(false)
        })?;
        info!(%tenant, module_id = id, soft, "software module deleted");
        Ok(())
    }

    // ── Artifacts ──────────────────────────────────────────────────

    pub fn upload_artifact(
        &self,
        tenant: &Tenant,
        module_id: EntityId,
        upload: ArtifactUpload<'_>,
    ) -> EngineResult<Artifact> {
        if upload.filename.is_empty() || upload.filename.contains('/') {
            return Err(EngineError::Validation(format!(
                "invalid artifact filename '{}'",
                upload.filename
            )));
        }
        let quotas = &self.ctx.config.quota;
        let size = upload.content.len() as u64;
        quota::check_and_reserve(
            "artifact bytes",
            upload.filename,
            0,
            upload.content.len(),
            quotas.max_artifact_size,
        )?;
        let sha256 = hex::encode(Sha256::digest(upload.content));
        if let Some(expected) = upload.sha256 {
            if !expected.eq_ignore_ascii_case(&sha256) {
                return Err(EngineError::Validation(format!(
                    "sha256 mismatch for '{}': expected {expected}, computed {sha256}",
                    upload.filename
                )));
            }
        }

        let now = self.ctx.now();
        let artifact = self.ctx.write("upload_artifact", |txn| {
            let mut module = module_in(txn, tenant, module_id)?;
            if module.deleted {
                return Err(EngineError::InvalidState(format!(
                    "software module {module_id} is deleted"
                )));
            }
            if in_locked_set(txn, tenant, module_id)? {
                return Err(EngineError::ReadOnly(format!(
                    "software module {module_id} belongs to a locked distribution set"
                )));
            }
            let artifact = Artifact {
                filename: upload.filename.to_string(),
                sha256: sha256.clone(),
                size,
                created_at: now,
            };
            let replaced = match module
                .artifacts
                .iter()
                .position(|a| a.filename == upload.filename)
            {
                Some(_) if !upload.overwrite => {
                    return Err(EngineError::already_exists("artifact", upload.filename));
                }
                Some(pos) => Some(std::mem::replace(&mut module.artifacts[pos], artifact.clone())),
                None => {
                    quota::check_and_reserve(
                        "artifacts",
                        &format!("software module {module_id}"),
                        module.artifacts.len(),
                        1,
                        quotas.max_artifacts_per_module,
                    )?;
                    module.artifacts.push(artifact.clone());
                    None
                }
            };
            module.audit.touch(now);
            txn.update(&mut module)?;
            txn.put_blob(&blob_key(tenant, &sha256), upload.content)?;
            if let Some(old) = replaced {
                if old.sha256 != sha256 {
                    release_blob_in(txn, tenant, &old.sha256)?;
                }
            }
            Ok(artifact)
        })?;
        info!(
            %tenant,
            module_id,
            filename = %artifact.filename,
            sha256 = %artifact.sha256,
            size = artifact.size,
            "artifact stored"
        );
        Ok(artifact)
    }

    pub fn artifacts(&self, tenant: &Tenant, module_id: EntityId) -> EngineResult<Vec<Artifact>> {
        Ok(self.module(tenant, module_id)?.artifacts)
    }

    /// Artifact metadata plus its content.
    pub fn artifact_content(
        &self,
        tenant: &Tenant,
        module_id: EntityId,
        filename: &str,
    ) -> EngineResult<(Artifact, Vec<u8>)> {
        self.ctx.read(|r| artifact_content_in(r, tenant, module_id, filename))
    }

    pub fn delete_artifact(
        &self,
        tenant: &Tenant,
        module_id: EntityId,
        filename: &str,
    ) -> EngineResult<()> {
        let now = self.ctx.now();
        self.ctx.write("delete_artifact", |txn| {
            let mut module = module_in(txn, tenant, module_id)?;
            if in_locked_set(txn, tenant, module_id)? {
                return Err(EngineError::ReadOnly(format!(
                    "software module {module_id} belongs to a locked distribution set"
                )));
            }
            let pos = module
                .artifacts
                .iter()
                .position(|a| a.filename == filename)
                .ok_or_else(|| EngineError::not_found("artifact", filename))?;
            let removed = module.artifacts.remove(pos);
            module.audit.touch(now);
            txn.update(&mut module)?;
            release_blob_in(txn, tenant, &removed.sha256)
        })
    }

    // ── Distribution sets ──────────────────────────────────────────

    pub fn create_set(
        &self,
        tenant: &Tenant,
        new: &NewDistributionSet,
    ) -> EngineResult<DistributionSet> {
        let now = self.ctx.now();
        let limit = self.ctx.config.quota.max_modules_per_distribution_set;
        let set = self.ctx.write("create_set", |txn| {
            let set_type = set_type_in(txn, tenant, &new.set_type)?;
            let existing: Vec<DistributionSet> = txn.scan(&tenant.prefix())?;
            if existing
                .iter()
                .any(|s| !s.deleted && s.name == new.name && s.version == new.version)
            {
                return Err(EngineError::already_exists(
                    "distribution set",
                    format!("{}:{}", new.name, new.version),
                ));
            }
            let modules: BTreeSet<EntityId> = new.modules.iter().copied().collect();
            quota::check_and_reserve("modules", &new.name, 0, modules.len(), limit)?;
            let complete = validate_composition(txn, tenant, &set_type, &modules)?;
            let mut set = DistributionSet {
                tenant: tenant.clone(),
                id: txn.next_id(tenant, "distribution_set")?,
                name: new.name.clone(),
                version: new.version.clone(),
                description: new.description.clone(),
                set_type: new.set_type.clone(),
                modules,
                complete,
                locked: false,
                deleted: false,
                metadata: BTreeMap::new(),
                audit: Audit::new(now),
            };
            txn.insert(&mut set)?;
            Ok(set)
        })?;
        info!(%tenant, distribution_set = set.id, name = %set.name, version = %set.version, complete = set.complete, "distribution set created");
        Ok(set)
    }

    pub fn set(&self, tenant: &Tenant, id: EntityId) -> EngineResult<DistributionSet> {
        self.ctx.read(|r| set_in(r, tenant, id))
    }

    /// Sets that are not soft-deleted.
    pub fn sets(&self, tenant: &Tenant) -> EngineResult<Vec<DistributionSet>> {
        self.ctx.read(|r| {
            let sets: Vec<DistributionSet> = r.scan(&tenant.prefix())?;
            Ok(sets.into_iter().filter(|s| !s.deleted).collect())
        })
    }

    /// Name and version are frozen once the set is locked; the description
    /// can always change.
    pub fn update_set(
        &self,
        tenant: &Tenant,
        id: EntityId,
        update: &DistributionSetUpdate,
    ) -> EngineResult<DistributionSet> {
        let now = self.ctx.now();
        self.ctx.write("update_set", |txn| {
            let mut set = set_in(txn, tenant, id)?;
            if set.locked && (update.name.is_some() || update.version.is_some()) {
                return Err(EngineError::ReadOnly(format!(
                    "distribution set {id} is locked"
                )));
            }
            if let Some(name) = &update.name {
                set.name = name.clone();
            }
            if let Some(version) = &update.version {
                set.version = version.clone();
            }
            if let Some(description) = &update.description {
                set.description = Some(description.clone());
            }
            set.audit.touch(now);
            txn.update(&mut set)?;
            Ok(set)
        })
    }

    pub fn assign_modules(
        &self,
        tenant: &Tenant,
        id: EntityId,
        module_ids: &[EntityId],
    ) -> EngineResult<DistributionSet> {
        let now = self.ctx.now();
        let limit = self.ctx.config.quota.max_modules_per_distribution_set;
        self.ctx.write("assign_modules", |txn| {
            let mut set = set_in(txn, tenant, id)?;
            if set.locked {
                return Err(EngineError::ReadOnly(format!(
                    "distribution set {id} is locked"
                )));
            }
            let added: Vec<EntityId> = module_ids
                .iter()
                .copied()
                .filter(|m| !set.modules.contains(m))
                .collect();
            quota::check_and_reserve(
                "modules",
                &format!("distribution set {id}"),
                set.modules.len(),
                added.len(),
                limit,
            )?;
            set.modules.extend(added);
            let set_type = set_type_in(txn, tenant, &set.set_type)?;
            set.complete = validate_composition(txn, tenant, &set_type, &set.modules)?;
            set.audit.touch(now);
            txn.update(&mut set)?;
            Ok(set)
        })
    }

    pub fn unassign_module(
        &self,
        tenant: &Tenant,
        id: EntityId,
        module_id: EntityId,
    ) -> EngineResult<DistributionSet> {
        let now = self.ctx.now();
        self.ctx.write("unassign_module", |txn| {
            let mut set = set_in(txn, tenant, id)?;
            if set.locked {
                return Err(EngineError::ReadOnly(format!(
                    "distribution set {id} is locked"
                )));
            }
            if !set.modules.remove(&module_id) {
                return Err(EngineError::not_found("software module", module_id));
            }
            let set_type = set_type_in(txn, tenant, &set.set_type)?;
            set.complete = validate_composition(txn, tenant, &set_type, &set.modules)?;
            set.audit.touch(now);
            txn.update(&mut set)?;
            Ok(set)
        })
    }

    /// Delete a set; locked sets are only marked deleted.
    pub fn delete_set(&self, tenant: &Tenant, id: EntityId) -> EngineResult<()> {
        let now = self.ctx.now();
        let soft = self.ctx.write("delete_set", |txn| {
            let mut set = set_in(txn, tenant, id)?;
            if set.locked {
                set.deleted = true;
                set.audit.touch(now);
                txn.update(&mut set)?;
                Ok(true)
            } else {
                txn.remove::<DistributionSet>(&DistributionSet::key_for(tenant, id))?;
                Ok(false)
            }
        })?;
        info!(%tenant, distribution_set = id, soft, "distribution set deleted");
        Ok(())
    }

    // ── Metadata ───────────────────────────────────────────────────

    pub fn module_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
    ) -> EngineResult<Vec<MetadataEntry>> {
        Ok(metadata::to_entries(&self.module(tenant, id)?.metadata))
    }

    pub fn add_module_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
        entries: &[MetadataEntry],
    ) -> EngineResult<Vec<MetadataEntry>> {
        let key = SoftwareModule::key_for(tenant, id);
        self.mutate_metadata::<SoftwareModule>(&key, id, |map, limit| {
            metadata::add_batch(map, entries, &format!("software module {id}"), limit)
        })
    }

    pub fn update_module_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
        meta_key: &str,
        value: &str,
    ) -> EngineResult<Vec<MetadataEntry>> {
        let key = SoftwareModule::key_for(tenant, id);
        self.mutate_metadata::<SoftwareModule>(&key, id, |map, _| {
            metadata::update_entry(map, meta_key, value)
        })
    }

    pub fn delete_module_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
        meta_key: &str,
    ) -> EngineResult<Vec<MetadataEntry>> {
        let key = SoftwareModule::key_for(tenant, id);
        self.mutate_metadata::<SoftwareModule>(&key, id, |map, _| {
            metadata::remove_entry(map, meta_key)
        })
    }

    pub fn set_metadata(&self, tenant: &Tenant, id: EntityId) -> EngineResult<Vec<MetadataEntry>> {
        Ok(metadata::to_entries(&self.set(tenant, id)?.metadata))
    }

    pub fn add_set_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
        entries: &[MetadataEntry],
    ) -> EngineResult<Vec<MetadataEntry>> {
        let key = DistributionSet::key_for(tenant, id);
        self.mutate_metadata::<DistributionSet>(&key, id, |map, limit| {
            metadata::add_batch(map, entries, &format!("distribution set {id}"), limit)
        })
    }

    pub fn update_set_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
        meta_key: &str,
        value: &str,
    ) -> EngineResult<Vec<MetadataEntry>> {
        let key = DistributionSet::key_for(tenant, id);
        self.mutate_metadata::<DistributionSet>(&key, id, |map, _| {
            metadata::update_entry(map, meta_key, value)
        })
    }

    pub fn delete_set_metadata(
        &self,
        tenant: &Tenant,
        id: EntityId,
        meta_key: &str,
    ) -> EngineResult<Vec<MetadataEntry>> {
        let key = DistributionSet::key_for(tenant, id);
        self.mutate_metadata::<DistributionSet>(&key, id, |map, _| {
            metadata::remove_entry(map, meta_key)
        })
    }

    fn mutate_metadata<T: WithMetadata>(
        &self,
        key: &str,
        id: EntityId,
        f: impl Fn(&mut BTreeMap<String, String>, u64) -> EngineResult<()>,
    ) -> EngineResult<Vec<MetadataEntry>> {
        let now = self.ctx.now();
        let limit = self.ctx.config.quota.max_metadata_per_entity;
        self.ctx.write("catalog_metadata", |txn| {
            let mut record = txn
                .get::<T>(key)?
                .ok_or_else(|| EngineError::not_found(T::KIND, id))?;
            f(record.metadata_mut(), limit)?;
            record.touch(now);
            txn.update(&mut record)?;
            Ok(metadata::to_entries(record.metadata_mut()))
        })
    }
}

pub fn artifact_content_in(
    r: &impl Reader,
    tenant: &Tenant,
    module_id: EntityId,
    filename: &str,
) -> EngineResult<(Artifact, Vec<u8>)> {
    let module = module_in(r, tenant, module_id)?;
    let artifact = module
        .artifacts
        .into_iter()
        .find(|a| a.filename == filename)
        .ok_or_else(|| EngineError::not_found("artifact", filename))?;
    let content = r
        .blob(&blob_key(tenant, &artifact.sha256))?
        .ok_or_else(|| EngineError::Storage(format!("blob {} missing", artifact.sha256)))?;
    Ok((artifact, content))
}
