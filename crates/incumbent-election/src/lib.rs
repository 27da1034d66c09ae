//! incumbent-election — lease-based leader election bound to worker
//! lifecycles.
//!
//! Candidates contend for one named lease in a shared [`LeaseStore`]. The
//! winner runs a set of workers for as long as it keeps renewing; a
//! candidate that loses the lease, or cannot renew it within the renew
//! deadline, stops its workers and marks itself unhealthy.
//!
//! ```text
//! ElectionLoop ── tick ──▶ LeaseHolder ──▶ LeaseStore (CAS)
//!      │
//!      └─ Transition ─▶ TermLedger ─▶ TransitionHandler
//!                                        └─ LeadershipBinding
//!                                             ├─ WorkerSupervisor
//!                                             └─ HealthState
//! ```
//!
//! [`LeaseStore`]: incumbent_state::LeaseStore

pub mod binding;
pub mod config;
pub mod election;
pub mod error;
pub mod holder;
pub mod supervisor;
pub mod transition;

pub use binding::LeadershipBinding;
pub use config::ElectionConfig;
pub use election::{ElectionLoop, ElectionState};
pub use error::{ElectionError, ElectionResult};
pub use holder::{Attempt, LeaseHolder};
pub use supervisor::{Runnable, WorkerSupervisor};
pub use transition::{StepDownReason, TermLedger, Transition, TransitionHandler};
