//! In-process lease store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreResult;
use crate::store::{LeaseStore, check_version};
use crate::types::{LeaseKey, LeaseRecord, VersionedLease};

/// Lease store backed by a mutex-guarded map.
///
/// Cloning shares the same map, so several candidates in one process can
/// contend on it. Used for tests and single-replica runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    leases: Arc<Mutex<HashMap<LeaseKey, VersionedLease>>>,
}

impl MemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lease records held.
    pub fn len(&self) -> usize {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if no lease has ever been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn read(&self, key: &LeaseKey) -> StoreResult<Option<VersionedLease>> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(leases.get(key).cloned())
    }

    async fn conditional_update(
        &self,
        record: &LeaseRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let key = record.key();
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        let actual = leases.get(&key).map(|lease| lease.version);
        let version = check_version(&key, expected_version, actual)?;
        leases.insert(
            key.clone(),
            VersionedLease {
                version,
                record: record.clone(),
            },
        );
        debug!(%key, version, holder = ?record.holder_identity, "lease written");
        Ok(version)
    }
}
