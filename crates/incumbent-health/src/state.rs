//! Process-wide health flag.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

#[derive(Debug)]
struct Inner {
    healthy: bool,
    reason: Option<String>,
}

/// Lock-guarded "safe to keep serving" flag.
///
/// Clones share the same flag. Every accessor takes the same mutex, so a
/// reader never observes a half-applied transition.
#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<Mutex<Inner>>,
}

impl HealthState {
    /// A healthy flag, as at process start.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                healthy: true,
                reason: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Confirm the process is healthy. Has no effect once it has been
    /// marked unhealthy; returns the resulting flag.
    pub fn mark_healthy(&self) -> bool {
        let inner = self.lock();
        if !inner.healthy {
            warn!(reason = ?inner.reason, "refusing to mark an unhealthy process healthy");
        }
        inner.healthy
    }

    /// Clear the flag for the rest of the process lifetime.
    ///
    /// The first reason recorded is kept.
    pub fn mark_unhealthy(&self, reason: impl Into<String>) {
        let mut inner = self.lock();
        if inner.healthy {
            let reason = reason.into();
            debug!(%reason, "process marked unhealthy");
            inner.healthy = false;
            inner.reason = Some(reason);
        }
    }

    /// Current flag.
    pub fn is_healthy(&self) -> bool {
        self.lock().healthy
    }

    /// Why the process was marked unhealthy, if it was.
    pub fn reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Flag and reason read under one lock.
    pub fn snapshot(&self) -> (bool, Option<String>) {
        let inner = self.lock();
        (inner.healthy, inner.reason.clone())
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
