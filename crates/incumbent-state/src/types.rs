//! Lease data model.
//!
//! These types are persisted as JSON by every store backend.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Identifies one lease: a name within a scope (namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    pub scope: String,
    pub name: String,
}

impl LeaseKey {
    /// Build a key, rejecting empty parts and embedded separators.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> StoreResult<Self> {
        let scope = scope.into();
        let name = name.into();
        if scope.trim().is_empty() || name.trim().is_empty() {
            return Err(StoreError::InvalidKey(format!(
                "scope and name must not be empty (scope={scope:?}, name={name:?})"
            )));
        }
        if scope.contains('/') || name.contains('/') {
            return Err(StoreError::InvalidKey(format!(
                "scope and name must not contain '/' (scope={scope:?}, name={name:?})"
            )));
        }
        Ok(Self { scope, name })
    }

    /// Composite key used by the table and Redis backends.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.scope, self.name)
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// The lease record as stored.
///
/// `holder_identity` is `None` when the lease has been released; the record
/// itself is never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub name: String,
    pub scope: String,
    pub holder_identity: Option<String>,
    pub lease_duration_secs: u32,
    /// Unix epoch milliseconds when the current holder acquired the lease.
    pub acquire_time_ms: u64,
    /// Unix epoch milliseconds of the last successful renewal.
    pub renew_time_ms: u64,
    /// Number of hand-offs between distinct holders.
    #[serde(default)]
    pub lease_transitions: u32,
}

impl LeaseRecord {
    /// A fresh record claimed by `identity` at `now_ms`.
    pub fn claimed(key: &LeaseKey, identity: &str, lease_duration: Duration, now_ms: u64) -> Self {
        Self {
            name: key.name.clone(),
            scope: key.scope.clone(),
            holder_identity: Some(identity.to_string()),
            lease_duration_secs: duration_secs(lease_duration),
            acquire_time_ms: now_ms,
            renew_time_ms: now_ms,
            lease_transitions: 0,
        }
    }

    /// The key this record is stored under.
    pub fn key(&self) -> LeaseKey {
        LeaseKey {
            scope: self.scope.clone(),
            name: self.name.clone(),
        }
    }

    /// Epoch milliseconds after which the lease is no longer valid.
    pub fn expires_at_ms(&self) -> u64 {
        self.renew_time_ms
            .saturating_add(u64::from(self.lease_duration_secs) * 1000)
    }

    /// True once `renew_time + lease_duration < now`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms() < now_ms
    }

    /// True if `identity` is the recorded holder.
    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity.as_deref() == Some(identity)
    }

    /// True if nobody may currently claim the lease: a holder is recorded
    /// and the lease has not expired.
    pub fn is_actively_held(&self, now_ms: u64) -> bool {
        self.holder_identity.is_some() && !self.is_expired(now_ms)
    }
}

/// A record together with its optimistic-concurrency token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedLease {
    /// Starts at 1 and increases by one on every successful write.
    pub version: u64,
    pub record: LeaseRecord,
}

/// Source of wall-clock time for lease timestamps.
pub trait Clock: Send + Sync {
    /// Current time in Unix epoch milliseconds.
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        epoch_millis()
    }
}

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn duration_secs(duration: Duration) -> u32 {
    // Sub-second leases round up so a lease is never recorded as zero-length.
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}
