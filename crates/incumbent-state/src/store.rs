//! The `LeaseStore` boundary.

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::types::{LeaseKey, LeaseRecord, VersionedLease};

/// Atomic read-modify-write storage for named lease records.
///
/// Implementations must make `conditional_update` a single atomic
/// compare-and-swap on the record's version. That is the only thing that
/// keeps two candidates from both believing they won the same round.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the current record, or `None` if it was never written.
    async fn read(&self, key: &LeaseKey) -> StoreResult<Option<VersionedLease>>;

    /// Write `record` if the stored version equals `expected_version`.
    ///
    /// `None` means the record must not exist yet. Returns the new version,
    /// or [`StoreError::Conflict`] if another writer changed it first.
    async fn conditional_update(
        &self,
        record: &LeaseRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64>;
}

/// Compare the stored version against the caller's expectation.
pub(crate) fn check_version(
    key: &LeaseKey,
    expected: Option<u64>,
    actual: Option<u64>,
) -> StoreResult<u64> {
    if expected != actual {
        return Err(StoreError::Conflict {
            key: key.table_key(),
            expected,
            actual,
        });
    }
    Ok(actual.unwrap_or(0) + 1)
}
