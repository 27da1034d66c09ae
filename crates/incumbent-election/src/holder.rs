//! LeaseHolder — one candidate's view of one lease.
//!
//! Every operation is a read followed by at most one conditional write.
//! The holder never caches the record between calls: the store is the
//! only authority on who leads.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use incumbent_state::{Clock, LeaseKey, LeaseRecord, LeaseStore, StoreResult, SystemClock};

/// Outcome of one acquisition or renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The lease was free or expired and is now ours.
    Acquired,
    /// We already held the lease and extended it.
    Renewed,
    /// Someone else holds it, or won the write race this round.
    Denied { holder: Option<String> },
}

impl Attempt {
    /// True for `Acquired` and `Renewed`.
    pub fn is_held(&self) -> bool {
        matches!(self, Attempt::Acquired | Attempt::Renewed)
    }
}

/// Issues read, acquire, renew and release operations for one candidate.
#[derive(Clone)]
pub struct LeaseHolder {
    store: Arc<dyn LeaseStore>,
    key: LeaseKey,
    identity: String,
    lease_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl LeaseHolder {
    /// Create a holder for `identity` contending on `key`.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        key: LeaseKey,
        identity: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            key,
            identity: identity.into(),
            lease_duration,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock used for lease timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// This candidate's identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The lease this holder contends on.
    pub fn key(&self) -> &LeaseKey {
        &self.key
    }

    /// Duration written into every claim.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Try to take or extend the lease with a single conditional write.
    ///
    /// Succeeds if the lease has no holder, has expired, or is already
    /// ours. Losing a write race is reported as `Denied`, not as an error.
    pub async fn try_acquire_or_renew(&self) -> StoreResult<Attempt> {
        let now = self.clock.now_millis();
        let current = self.store.read(&self.key).await?;

        let claim = LeaseRecord::claimed(&self.key, &self.identity, self.lease_duration, now);

        let (record, expected, attempt) = match current {
            None => (claim, None, Attempt::Acquired),
            Some(lease) if lease.record.is_held_by(&self.identity) => {
                let mut record = lease.record;
                record.renew_time_ms = now;
                record.lease_duration_secs = claim.lease_duration_secs;
                (record, Some(lease.version), Attempt::Renewed)
            }
            Some(lease) if lease.record.is_actively_held(now) => {
                return Ok(Attempt::Denied {
                    holder: lease.record.holder_identity,
                });
            }
            Some(lease) => {
                let previous = lease.record.holder_identity;
                let mut record = claim;
                record.lease_transitions = lease.record.lease_transitions;
                if previous.is_some() {
                    record.lease_transitions = record.lease_transitions.saturating_add(1);
                }
                debug!(key = %self.key, ?previous, "taking over expired or released lease");
                (record, Some(lease.version), Attempt::Acquired)
            }
        };

        match self.store.conditional_update(&record, expected).await {
            Ok(version) => {
                debug!(key = %self.key, identity = %self.identity, version, ?attempt, "lease write succeeded");
                Ok(attempt)
            }
            Err(e) if e.is_conflict() => {
                debug!(key = %self.key, identity = %self.identity, "lost lease write race");
                // Best effort: report who beat us.
                let holder = self.observe_holder().await.ok().flatten();
                Ok(Attempt::Denied { holder })
            }
            Err(e) => Err(e),
        }
    }

    /// Clear the holder field if this identity holds the lease.
    ///
    /// Advisory only: expiry is what actually frees the lease if this
    /// fails. Returns whether a release was written.
    pub async fn release(&self) -> StoreResult<bool> {
        let Some(lease) = self.store.read(&self.key).await? else {
            return Ok(false);
        };
        if !lease.record.is_held_by(&self.identity) {
            debug!(key = %self.key, holder = ?lease.record.holder_identity, "not the holder, nothing to release");
            return Ok(false);
        }

        let mut record = lease.record;
        record.holder_identity = None;
        record.renew_time_ms = self.clock.now_millis();

        match self.store.conditional_update(&record, Some(lease.version)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => {
                warn!(key = %self.key, "lease changed before it could be released");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Read who holds the lease now, without trying to take it.
    ///
    /// A released record reports `None`; an expired one still reports its
    /// last holder.
    pub async fn observe_holder(&self) -> StoreResult<Option<String>> {
        Ok(self
            .store
            .read(&self.key)
            .await?
            .and_then(|lease| lease.record.holder_identity))
    }
}
