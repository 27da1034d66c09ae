//! RedbLeaseStore — redb-backed lease persistence.
//!
//! Each `conditional_update` runs inside one redb write transaction:
//! read the stored version, compare, write, commit. redb serializes write
//! transactions, which makes the sequence an atomic compare-and-swap for
//! every handle sharing the same `Database`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{LeaseStore, check_version};
use crate::tables::LEASES;
use crate::types::{LeaseKey, LeaseRecord, VersionedLease};

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe lease store backed by redb.
#[derive(Clone)]
pub struct RedbLeaseStore {
    db: Arc<Database>,
}

impl RedbLeaseStore {
    /// Open (or create) a persistent lease store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "lease store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory lease store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory lease store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_sync(&self, key: &LeaseKey) -> StoreResult<Option<VersionedLease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(key.table_key().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: VersionedLease =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    fn update_sync(&self, record: &LeaseRecord, expected: Option<u64>) -> StoreResult<u64> {
        let key = record.key();
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let actual = match table.get(table_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let stored: VersionedLease =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(stored.version)
                }
                None => None,
            };
            // An early return drops `txn`, which aborts it.
            version = check_version(&key, expected, actual)?;
            let value = serde_json::to_vec(&VersionedLease {
                version,
                record: record.clone(),
            })
            .map_err(map_err!(Serialize))?;
            table
                .insert(table_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %table_key, version, holder = ?record.holder_identity, "lease stored");
        Ok(version)
    }
}

#[async_trait]
impl LeaseStore for RedbLeaseStore {
    async fn read(&self, key: &LeaseKey) -> StoreResult<Option<VersionedLease>> {
        let store = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || store.read_sync(&key))
            .await
            .map_err(map_err!(Transaction))?
    }

    async fn conditional_update(
        &self,
        record: &LeaseRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.update_sync(&record, expected_version))
            .await
            .map_err(map_err!(Transaction))?
    }
}
