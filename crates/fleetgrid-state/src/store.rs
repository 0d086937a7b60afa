//! StateStore — redb-backed transactional persistence for FleetGrid.
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns. Reads go
//! through [`ReadTxn`] snapshots; mutations go through [`WriteTxn`], which
//! commits only when the caller's closure returns `Ok`. redb serializes
//! write transactions, so a count followed by an insert inside one
//! `write` closure cannot interleave with another writer.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::{Audit, Tenant};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A JSON record stored under a string key in one table.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    /// Composite key of this record.
    fn table_key(&self) -> String;

    /// Audit block of versioned records; `None` for append-only rows.
    fn audit(&self) -> Option<&Audit> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut Audit> {
        None
    }
}

/// Read operations shared by read and write transactions.
pub trait Reader {
    /// Load one record by key.
    fn get<T: Record>(&self, key: &str) -> StateResult<Option<T>>;

    /// Load every record whose key starts with `prefix`, in key order.
    fn scan<T: Record>(&self, prefix: &str) -> StateResult<Vec<T>>;

    /// Number of records whose key starts with `prefix`.
    fn count<T: Record>(&self, prefix: &str) -> StateResult<usize>;

    /// Ids stored in an index table under `prefix`, in key order.
    fn index_ids(
        &self,
        index: TableDefinition<'static, &'static str, u64>,
        prefix: &str,
    ) -> StateResult<Vec<u64>>;

    /// Raw bytes stored in the artifact blob table.
    fn blob(&self, key: &str) -> StateResult<Option<Vec<u8>>>;
}

/// Read-only snapshot.
pub struct ReadTxn {
    inner: redb::ReadTransaction,
}

/// Exclusive write transaction; see [`StateStore::write`].
pub struct WriteTxn {
    inner: redb::WriteTransaction,
}

macro_rules! impl_reader {
    ($txn:ty) => {
        impl Reader for $txn {
            fn get<T: Record>(&self, key: &str) -> StateResult<Option<T>> {
                let table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
                match table.get(key).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let record: T = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Deserialize))?;
                        Ok(Some(record))
                    }
                    None => Ok(None),
                }
            }

            fn scan<T: Record>(&self, prefix: &str) -> StateResult<Vec<T>> {
                let table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
                let mut results = Vec::new();
                for entry in table.range(prefix..).map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    if !key.value().starts_with(prefix) {
                        break;
                    }
                    let record: T =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    results.push(record);
                }
                Ok(results)
            }

            fn count<T: Record>(&self, prefix: &str) -> StateResult<usize> {
                let table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
                let mut count = 0;
                for entry in table.range(prefix..).map_err(map_err!(Read))? {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    if !key.value().starts_with(prefix) {
                        break;
                    }
                    count += 1;
                }
                Ok(count)
            }

            fn index_ids(
                &self,
                index: TableDefinition<'static, &'static str, u64>,
                prefix: &str,
            ) -> StateResult<Vec<u64>> {
                let table = self.inner.open_table(index).map_err(map_err!(Table))?;
                let mut ids = Vec::new();
                for entry in table.range(prefix..).map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    if !key.value().starts_with(prefix) {
                        break;
                    }
                    ids.push(value.value());
                }
                Ok(ids)
            }

            fn blob(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
                let table = self
                    .inner
                    .open_table(ARTIFACT_BLOBS)
                    .map_err(map_err!(Table))?;
                Ok(table
                    .get(key)
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_vec()))
            }
        }
    };
}

impl_reader!(ReadTxn);
impl_reader!(WriteTxn);

impl WriteTxn {
    /// Insert a new record. Fails with `AlreadyExists` if the key is taken.
    ///
    /// Versioned records start at version 1.
    pub fn insert<T: Record>(&self, record: &mut T) -> StateResult<()> {
        let key = record.table_key();
        if let Some(audit) = record.audit_mut() {
            audit.version = 1;
        }
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let mut table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
        if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
            return Err(StateError::AlreadyExists(key));
        }
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Replace an existing record, checking its optimistic version.
    ///
    /// The caller's `audit.version` must equal the stored one; on success
    /// the version is incremented in both the stored copy and `record`.
    pub fn update<T: Record>(&self, record: &mut T) -> StateResult<()> {
        let key = record.table_key();
        let mut table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
        let stored: T = match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => return Err(StateError::NotFound(key)),
        };
        if let (Some(current), Some(audit)) = (stored.audit(), record.audit_mut()) {
            if current.version != audit.version {
                return Err(StateError::Conflict {
                    key,
                    expected: audit.version,
                    found: current.version,
                });
            }
            audit.version += 1;
        }
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Append an unversioned row, overwriting any row with the same key.
    pub fn put<T: Record>(&self, record: &T) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let mut table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Delete a record by key. Returns true if it existed.
    pub fn remove<T: Record>(&self, key: &str) -> StateResult<bool> {
        let mut table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
        Ok(table.remove(key).map_err(map_err!(Write))?.is_some())
    }

    /// Delete every record whose key starts with `prefix`. Returns the count.
    pub fn remove_prefix<T: Record>(&self, prefix: &str) -> StateResult<usize> {
        let mut table = self.inner.open_table(T::TABLE).map_err(map_err!(Table))?;
        let keys: Vec<String> = {
            let mut keys = Vec::new();
            for entry in table.range(prefix..).map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                let k = key.value().to_string();
                if !k.starts_with(prefix) {
                    break;
                }
                keys.push(k);
            }
            keys
        };
        for key in &keys {
            table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        Ok(keys.len())
    }

    /// Allocate the next id of `kind` for a tenant.
    pub fn next_id(&self, tenant: &Tenant, kind: &str) -> StateResult<u64> {
        let key = format!("{tenant}/{kind}");
        let mut table = self.inner.open_table(SEQUENCES).map_err(map_err!(Table))?;
        let next = table
            .get(key.as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0)
            + 1;
        table.insert(key.as_str(), next).map_err(map_err!(Write))?;
        Ok(next)
    }

    pub fn index_put(
        &self,
        index: TableDefinition<'static, &'static str, u64>,
        key: &str,
        id: u64,
    ) -> StateResult<()> {
        let mut table = self.inner.open_table(index).map_err(map_err!(Table))?;
        table.insert(key, id).map_err(map_err!(Write))?;
        Ok(())
    }

    pub fn index_remove(
        &self,
        index: TableDefinition<'static, &'static str, u64>,
        key: &str,
    ) -> StateResult<bool> {
        let mut table = self.inner.open_table(index).map_err(map_err!(Table))?;
        Ok(table.remove(key).map_err(map_err!(Write))?.is_some())
    }

    /// Store artifact bytes under `{tenant}/{sha256}`; identical content is stored once.
    pub fn put_blob(&self, key: &str, bytes: &[u8]) -> StateResult<()> {
        let mut table = self
            .inner
            .open_table(ARTIFACT_BLOBS)
            .map_err(map_err!(Table))?;
        table.insert(key, bytes).map_err(map_err!(Write))?;
        Ok(())
    }

    pub fn remove_blob(&self, key: &str) -> StateResult<bool> {
        let mut table = self
            .inner
            .open_table(ARTIFACT_BLOBS)
            .map_err(map_err!(Table))?;
        Ok(table.remove(key).map_err(map_err!(Write))?.is_some())
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            TARGETS,
            MODULE_TYPES,
            SET_TYPES,
            MODULES,
            DISTRIBUTION_SETS,
            ACTIONS,
            ACTION_STATUS,
            ROLLOUTS,
            ROLLOUT_GROUPS,
            ARTIFACT_BLOBS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        for index in [ACTIONS_BY_TARGET, ACTIONS_BY_GROUP, SEQUENCES] {
            txn.open_table(index).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` against a consistent read snapshot.
    pub fn read<T, E>(&self, f: impl FnOnce(&ReadTxn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let inner = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&ReadTxn { inner })
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits when `f` returns `Ok`; aborts (discarding every write made
    /// by `f`) when it returns `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&WriteTxn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let inner = self.db.begin_write().map_err(map_err!(Transaction))?;
        let txn = WriteTxn { inner };
        match f(&txn) {
            Ok(value) => {
                txn.inner.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.inner.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }
}
