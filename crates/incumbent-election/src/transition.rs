//! Leadership transition events and the ledger that orders them.
//!
//! The election loop never calls start or stop hooks directly. It emits a
//! [`Transition`], the [`TermLedger`] checks it against the terms seen so
//! far, and only then is it handed to a [`TransitionHandler`]. A start
//! while a term is open, or a stop for a term that is not open, is an
//! invariant violation and ends the loop.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ElectionError, ElectionResult};

/// Why a leadership term ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDownReason {
    /// Another candidate holds the lease.
    LeaseLost,
    /// No successful renewal within the renew deadline.
    RenewDeadlineExceeded,
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for StepDownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepDownReason::LeaseLost => write!(f, "lease lost to another candidate"),
            StepDownReason::RenewDeadlineExceeded => write!(f, "renew deadline exceeded"),
            StepDownReason::Shutdown => write!(f, "shutting down"),
        }
    }
}

/// A leadership transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// This candidate became leader; `term` counts from 1.
    StartedLeading { term: u64 },
    /// The term that started with the matching `StartedLeading` ended.
    StoppedLeading { term: u64, reason: StepDownReason },
    /// The observed lease holder changed.
    NewLeader { identity: String },
}

/// Receives transitions after the ledger has admitted them.
#[async_trait]
pub trait TransitionHandler: Send {
    /// React to one transition. An error here is fatal to the loop.
    fn on_transition(&mut self, transition: &Transition) -> ElectionResult<()>;

    /// Wait at most `grace` for work stopped by the last `StoppedLeading`.
    async fn drain(&mut self, _grace: Duration) {}
}

/// Numbers leadership terms and rejects out-of-order transitions.
#[derive(Debug, Default)]
pub struct TermLedger {
    active: Option<u64>,
    last: u64,
}

impl TermLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The open term, if any.
    pub fn active(&self) -> Option<u64> {
        self.active
    }

    /// Number of terms started so far.
    pub fn terms_started(&self) -> u64 {
        self.last
    }

    /// Open the next term.
    pub fn begin(&mut self) -> ElectionResult<u64> {
        if let Some(term) = self.active {
            return Err(ElectionError::InvariantViolation(format!(
                "started leading while term {term} is still active"
            )));
        }
        self.last += 1;
        self.active = Some(self.last);
        Ok(self.last)
    }

    /// Close the open term.
    pub fn end(&mut self, term: u64) -> ElectionResult<()> {
        match self.active {
            Some(active) if active == term => {
                self.active = None;
                Ok(())
            }
            Some(active) => Err(ElectionError::InvariantViolation(format!(
                "stopped leading for term {term} while term {active} is active"
            ))),
            None => Err(ElectionError::InvariantViolation(format!(
                "stopped leading for term {term} with no active term"
            ))),
        }
    }

    /// Validate `transition` and advance the ledger.
    pub fn admit(&mut self, transition: &Transition) -> ElectionResult<()> {
        match transition {
            Transition::StartedLeading { term } => {
                let expected = self.last + 1;
                if *term != expected {
                    return Err(ElectionError::InvariantViolation(format!(
                        "started leading for term {term}, expected term {expected}"
                    )));
                }
                self.begin().map(|_| ())
            }
            Transition::StoppedLeading { term, .. } => self.end(*term),
            Transition::NewLeader { .. } => Ok(()),
        }
    }
}
