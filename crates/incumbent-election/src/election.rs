//! ElectionLoop — the leadership state machine.
//!
//! One task drives the loop. Every `retry_period` it makes one attempt
//! through the [`LeaseHolder`] and decides whether to stay, lead, or step
//! down:
//!
//! ```text
//!            Acquired / Renewed
//!   Standby ───────────────────▶ Leading
//!      ▲                            │
//!      │  Denied, or no renewal     │
//!      └──── within renew_deadline ─┘
//!
//!   any state ── shutdown ──▶ Stopped
//! ```
//!
//! Transitions go through a [`TermLedger`] before reaching the handler,
//! so a term can only start once and end once.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use incumbent_state::{StoreError, StoreResult};

use crate::config::ElectionConfig;
use crate::error::{ElectionError, ElectionResult};
use crate::holder::{Attempt, LeaseHolder};
use crate::transition::{StepDownReason, TermLedger, Transition, TransitionHandler};

/// Where the state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Not leading; trying to acquire on every tick.
    Standby,
    /// Holding the lease; renewing on every tick.
    Leading,
    /// Terminal.
    Stopped,
}

/// What the loop does after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Drives acquisition and renewal for one candidate.
pub struct ElectionLoop<H> {
    holder: LeaseHolder,
    config: ElectionConfig,
    handler: H,
    ledger: TermLedger,
    state_tx: watch::Sender<ElectionState>,
    /// Last holder identity seen in the store.
    observed_leader: Option<String>,
    /// When the current term last renewed successfully.
    last_renew: Option<Instant>,
}

impl<H: TransitionHandler> ElectionLoop<H> {
    /// Create a loop in `Standby`.
    pub fn new(holder: LeaseHolder, config: ElectionConfig, handler: H) -> ElectionResult<Self> {
        config.validate()?;
        if holder.identity().trim().is_empty() {
            return Err(ElectionError::Config(
                "candidate identity must not be empty".to_string(),
            ));
        }
        if holder.lease_duration() != config.lease_duration {
            return Err(ElectionError::Config(format!(
                "lease holder duration ({:?}) differs from lease_duration ({:?})",
                holder.lease_duration(),
                config.lease_duration
            )));
        }

        let (state_tx, _) = watch::channel(ElectionState::Standby);
        Ok(Self {
            holder,
            config,
            handler,
            ledger: TermLedger::new(),
            state_tx,
            observed_leader: None,
            last_renew: None,
        })
    }

    /// Subscribe to state changes.
    pub fn state_watch(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped), or
    /// until a demotion when `stop_on_demotion` is set.
    ///
    /// Only an invariant violation is returned as an error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ElectionResult<()> {
        info!(
            identity = %self.holder.identity(),
            lease = %self.holder.key(),
            lease_duration = ?self.config.lease_duration,
            renew_deadline = ?self.config.renew_deadline,
            retry_period = ?self.config.retry_period,
            "election loop started"
        );

        let mut ticker = tokio::time::interval(self.config.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            // A store call that hangs must not hold up cancellation.
            let outcome = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                outcome = self.tick() => outcome,
            };

            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => {
                    self.handler.drain(self.config.worker_grace).await;
                    self.set_state(ElectionState::Stopped);
                    info!(identity = %self.holder.identity(), "election loop stopped after demotion");
                    return Ok(());
                }
                Err(e) => {
                    error!(identity = %self.holder.identity(), error = %e, "election loop aborted");
                    return Err(e);
                }
            }
        }

        self.cancel().await
    }

    async fn tick(&mut self) -> ElectionResult<Flow> {
        match self.state() {
            ElectionState::Standby => self.try_lead().await,
            ElectionState::Leading => self.keep_leading().await,
            ElectionState::Stopped => Ok(Flow::Stop),
        }
    }

    async fn try_lead(&mut self) -> ElectionResult<Flow> {
        match self.attempt(self.config.retry_period).await {
            Ok(attempt) if attempt.is_held() => {
                self.last_renew = Some(Instant::now());
                self.set_state(ElectionState::Leading);
                let term = self.ledger.terms_started() + 1;
                self.dispatch(Transition::StartedLeading { term })?;
                let identity = self.holder.identity().to_string();
                self.observe(Some(identity))?;
            }
            Ok(Attempt::Denied { holder }) => {
                debug!(identity = %self.holder.identity(), ?holder, "lease held elsewhere");
                self.observe(holder)?;
            }
            Ok(_) => {}
            Err(e) if !e.is_transient() => {
                error!(identity = %self.holder.identity(), error = %e, "lease acquisition hit a non-retryable store error");
            }
            Err(e) => {
                warn!(identity = %self.holder.identity(), error = %e, "lease acquisition attempt failed");
                let observed =
                    tokio::time::timeout(self.config.retry_period, self.holder.observe_holder()).await;
                if let Ok(Ok(holder)) = observed {
                    self.observe(holder)?;
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn keep_leading(&mut self) -> ElectionResult<Flow> {
        let since = self.since_last_renew();
        if since >= self.config.renew_deadline {
            warn!(identity = %self.holder.identity(), ?since, "renew deadline passed before attempt");
            return self.step_down(StepDownReason::RenewDeadlineExceeded);
        }

        let budget = self.config.renew_deadline - since;
        match self.attempt(budget).await {
            Ok(Attempt::Renewed | Attempt::Acquired) => {
                self.last_renew = Some(Instant::now());
                debug!(identity = %self.holder.identity(), "lease renewed");
                Ok(Flow::Continue)
            }
            Ok(Attempt::Denied { holder }) => {
                warn!(identity = %self.holder.identity(), ?holder, "lease taken by another candidate");
                let flow = self.step_down(StepDownReason::LeaseLost)?;
                self.observe(holder)?;
                Ok(flow)
            }
            Err(e) => {
                let since = self.since_last_renew();
                if since >= self.config.renew_deadline {
                    warn!(identity = %self.holder.identity(), error = %e, ?since, "failed to renew within deadline");
                    self.step_down(StepDownReason::RenewDeadlineExceeded)
                } else {
                    let remaining = self.config.renew_deadline - since;
                    if e.is_transient() {
                        warn!(identity = %self.holder.identity(), error = %e, ?remaining, "lease renewal failed, retrying");
                    } else {
                        error!(identity = %self.holder.identity(), error = %e, ?remaining, "lease renewal hit a non-retryable store error");
                    }
                    Ok(Flow::Continue)
                }
            }
        }
    }

    fn step_down(&mut self, reason: StepDownReason) -> ElectionResult<Flow> {
        let term = self.ledger.active().ok_or_else(|| {
            ElectionError::InvariantViolation(format!(
                "stepping down ({reason}) with no active term"
            ))
        })?;
        self.last_renew = None;
        self.dispatch(Transition::StoppedLeading { term, reason })?;

        if self.config.stop_on_demotion {
            Ok(Flow::Stop)
        } else {
            self.set_state(ElectionState::Standby);
            Ok(Flow::Continue)
        }
    }

    /// Cancellation: end the term, release the lease, wait for workers.
    async fn cancel(mut self) -> ElectionResult<()> {
        info!(identity = %self.holder.identity(), state = ?self.state(), "election loop cancelled");

        if let Some(term) = self.ledger.active() {
            self.last_renew = None;
            self.dispatch(Transition::StoppedLeading {
                term,
                reason: StepDownReason::Shutdown,
            })?;

            if self.config.release_on_cancel {
                match tokio::time::timeout(self.config.worker_grace, self.holder.release()).await {
                    Ok(Ok(true)) => info!(lease = %self.holder.key(), "lease released"),
                    Ok(Ok(false)) => debug!(lease = %self.holder.key(), "lease no longer held, nothing to release"),
                    Ok(Err(e)) => warn!(lease = %self.holder.key(), error = %e, "failed to release lease"),
                    Err(_) => warn!(lease = %self.holder.key(), "timed out releasing lease"),
                }
            }

            self.handler.drain(self.config.worker_grace).await;
        }

        self.set_state(ElectionState::Stopped);
        info!(identity = %self.holder.identity(), terms = self.ledger.terms_started(), "election loop stopped");
        Ok(())
    }

    async fn attempt(&self, budget: Duration) -> StoreResult<Attempt> {
        match tokio::time::timeout(budget, self.holder.try_acquire_or_renew()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Emit `NewLeader` once per change of the observed holder.
    fn observe(&mut self, holder: Option<String>) -> ElectionResult<()> {
        if holder == self.observed_leader {
            return Ok(());
        }
        self.observed_leader = holder.clone();
        match holder {
            Some(identity) => self.dispatch(Transition::NewLeader { identity }),
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, transition: Transition) -> ElectionResult<()> {
        self.ledger.admit(&transition)?;
        self.handler.on_transition(&transition)
    }

    fn since_last_renew(&self) -> Duration {
        self.last_renew
            .map(|at| at.elapsed())
            .unwrap_or(self.config.renew_deadline)
    }

    fn set_state(&self, state: ElectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(identity = %self.holder.identity(), from = ?previous, to = ?state, "election state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use incumbent_state::{LeaseKey, LeaseStore, MemoryLeaseStore};

    use super::*;

    /// Records every transition it receives.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Transition>>>);

    impl Recorder {
        fn events(&self) -> Vec<Transition> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransitionHandler for Recorder {
        fn on_transition(&mut self, transition: &Transition) -> ElectionResult<()> {
            self.0.lock().unwrap().push(transition.clone());
            Ok(())
        }
    }

    fn config() -> ElectionConfig {
        ElectionConfig::default()
    }

    fn holder(store: &MemoryLeaseStore, identity: &str) -> LeaseHolder {
        LeaseHolder::new(
            Arc::new(store.clone()),
            LeaseKey::new("default", "controller-lock").unwrap(),
            identity,
            config().lease_duration,
        )
    }

    #[test]
    fn rejects_invalid_config() {
        let store = MemoryLeaseStore::new();
        let bad = ElectionConfig {
            renew_deadline: Duration::from_secs(20),
            ..config()
        };
        assert!(ElectionLoop::new(holder(&store, "pod-a"), bad, Recorder::default()).is_err());
    }

    #[test]
    fn rejects_empty_identity() {
        let store = MemoryLeaseStore::new();
        let result = ElectionLoop::new(holder(&store, " "), config(), Recorder::default());
        assert!(matches!(result, Err(ElectionError::Config(_))));
    }

    #[test]
    fn rejects_mismatched_lease_duration() {
        let store = MemoryLeaseStore::new();
        let other = ElectionConfig {
            lease_duration: Duration::from_secs(30),
            ..config()
        };
        assert!(ElectionLoop::new(holder(&store, "pod-a"), other, Recorder::default()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn acquires_on_first_tick_and_renews_without_restarting() {
        let store = MemoryLeaseStore::new();
        let recorder = Recorder::default();
        let election = ElectionLoop::new(holder(&store, "pod-a"), config(), recorder.clone()).unwrap();
        let mut state = election.state_watch();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(election.run(shutdown_rx));
        state.wait_for(|s| *s == ElectionState::Leading).await.unwrap();

        // Several renewals later there is still exactly one start.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(
            recorder.events(),
            vec![
                Transition::StartedLeading { term: 1 },
                Transition::NewLeader {
                    identity: "pod-a".to_string()
                },
            ]
        );
        let lease = store
            .read(&LeaseKey::new("default", "controller-lock").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(lease.version >= 5);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn standby_reports_each_new_leader_once() {
        let store = MemoryLeaseStore::new();
        let leader = holder(&store, "pod-b");
        leader.try_acquire_or_renew().await.unwrap();

        let recorder = Recorder::default();
        let election = ElectionLoop::new(holder(&store, "pod-a"), config(), recorder.clone()).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(election.run(shutdown_rx));

        // pod-b keeps renewing; pod-a sees it several times but reports it once.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            leader.try_acquire_or_renew().await.unwrap();
        }
        assert_eq!(
            recorder.events(),
            vec![Transition::NewLeader {
                identity: "pod-b".to_string()
            }]
        );

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_in_standby_emits_nothing() {
        let store = MemoryLeaseStore::new();
        holder(&store, "pod-b").try_acquire_or_renew().await.unwrap();

        let recorder = Recorder::default();
        let election = ElectionLoop::new(holder(&store, "pod-a"), config(), recorder.clone()).unwrap();
        let mut state = election.state_watch();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(election.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(*state.borrow_and_update(), ElectionState::Stopped);
        assert!(
            recorder
                .events()
                .iter()
                .all(|t| matches!(t, Transition::NewLeader { .. }))
        );
        // The other candidate's lease is untouched.
        assert_eq!(
            holder(&store, "pod-a").observe_holder().await.unwrap().as_deref(),
            Some("pod-b")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_the_loop() {
        let store = MemoryLeaseStore::new();
        let recorder = Recorder::default();
        let election = ElectionLoop::new(holder(&store, "pod-a"), config(), recorder.clone()).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(election.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(shutdown_tx);
        task.await.unwrap().unwrap();

        let events = recorder.events();
        assert!(matches!(
            events.last(),
            Some(Transition::StoppedLeading {
                term: 1,
                reason: StepDownReason::Shutdown
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_violation_aborts_the_loop() {
        struct Refuses;

        #[async_trait]
        impl TransitionHandler for Refuses {
            fn on_transition(&mut self, transition: &Transition) -> ElectionResult<()> {
                match transition {
                    Transition::StartedLeading { .. } => Err(ElectionError::InvariantViolation(
                        "workers already running".to_string(),
                    )),
                    _ => Ok(()),
                }
            }
        }

        let store = MemoryLeaseStore::new();
        let election = ElectionLoop::new(holder(&store, "pod-a"), config(), Refuses).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = election.run(shutdown_rx).await.unwrap_err();
        assert!(matches!(err, ElectionError::InvariantViolation(_)));
    }
}
