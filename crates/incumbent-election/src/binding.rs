//! LeadershipBinding — ties leadership terms to workers and health.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use incumbent_health::HealthState;

use crate::error::ElectionResult;
use crate::supervisor::WorkerSupervisor;
use crate::transition::{Transition, TransitionHandler};

/// The production [`TransitionHandler`].
///
/// Starting a term starts every worker. Ending a term signals every
/// worker and marks the process unhealthy for good, so that an external
/// supervisor recycles it.
pub struct LeadershipBinding {
    identity: String,
    supervisor: WorkerSupervisor,
    health: HealthState,
}

impl LeadershipBinding {
    pub fn new(identity: impl Into<String>, supervisor: WorkerSupervisor, health: HealthState) -> Self {
        Self {
            identity: identity.into(),
            supervisor,
            health,
        }
    }
}

#[async_trait]
impl TransitionHandler for LeadershipBinding {
    fn on_transition(&mut self, transition: &Transition) -> ElectionResult<()> {
        match transition {
            Transition::StartedLeading { term } => {
                info!(identity = %self.identity, term, "became leader, starting workers");
                self.supervisor.start_all()?;
            }
            Transition::StoppedLeading { term, reason } => {
                info!(identity = %self.identity, term, %reason, "no longer leader, stopping workers");
                self.supervisor.stop_all();
                self.health.mark_unhealthy(reason.to_string());
            }
            Transition::NewLeader { identity } if *identity == self.identity => {
                info!(identity = %self.identity, "still the leader");
            }
            Transition::NewLeader { identity } => {
                info!(leader = %identity, "new leader observed");
            }
        }
        Ok(())
    }

    async fn drain(&mut self, grace: Duration) {
        let aborted = self.supervisor.join_stopped(grace).await;
        if aborted > 0 {
            warn!(aborted, ?grace, "workers did not stop within grace period");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::watch;

    use super::*;
    use crate::error::ElectionError;
    use crate::supervisor::Runnable;
    use crate::transition::StepDownReason;

    struct Idle(AtomicUsize);

    #[async_trait]
    impl Runnable for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        async fn run(&self, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let _ = stop.wait_for(|stopped| *stopped).await;
            Ok(())
        }
    }

    fn binding() -> (LeadershipBinding, Arc<Idle>, HealthState) {
        let worker = Arc::new(Idle(AtomicUsize::new(0)));
        let workers: Vec<Arc<dyn Runnable>> = vec![worker.clone()];
        let health = HealthState::new();
        let binding = LeadershipBinding::new("pod-a", WorkerSupervisor::new(workers), health.clone());
        (binding, worker, health)
    }

    #[tokio::test]
    async fn start_runs_workers_and_keeps_healthy() {
        let (mut binding, worker, health) = binding();
        binding
            .on_transition(&Transition::StartedLeading { term: 1 })
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(binding.supervisor.is_running());
        assert_eq!(worker.0.load(Ordering::SeqCst), 1);
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn stop_signals_workers_and_marks_unhealthy() {
        let (mut binding, _worker, health) = binding();
        binding
            .on_transition(&Transition::StartedLeading { term: 1 })
            .unwrap();
        binding
            .on_transition(&Transition::StoppedLeading {
                term: 1,
                reason: StepDownReason::LeaseLost,
            })
            .unwrap();

        assert!(!binding.supervisor.is_running());
        assert!(!health.is_healthy());
        assert_eq!(health.reason().as_deref(), Some("lease lost to another candidate"));

        binding.drain(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn new_leader_changes_nothing() {
        let (mut binding, worker, health) = binding();
        binding
            .on_transition(&Transition::NewLeader {
                identity: "pod-b".to_string(),
            })
            .unwrap();
        assert!(!binding.supervisor.is_running());
        assert_eq!(worker.0.load(Ordering::SeqCst), 0);
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn second_start_surfaces_violation() {
        let (mut binding, _worker, _health) = binding();
        binding
            .on_transition(&Transition::StartedLeading { term: 1 })
            .unwrap();
        let err = binding
            .on_transition(&Transition::StartedLeading { term: 2 })
            .unwrap_err();
        assert!(matches!(err, ElectionError::InvariantViolation(_)));
    }
}
