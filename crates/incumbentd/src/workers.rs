//! Built-in heartbeat workers.
//!
//! Stand-ins for real controllers: each logs a heartbeat on a fixed
//! interval for as long as this process leads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use incumbent_election::Runnable;

pub struct Heartbeat {
    name: String,
    interval: Duration,
    beats: AtomicU64,
}

impl Heartbeat {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            beats: AtomicU64::new(0),
        }
    }

    /// Heartbeats logged across all terms.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Runnable for Heartbeat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                _ = ticker.tick() => {
                    let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(worker = %self.name, beat, "heartbeat");
                }
            }
        }
        Ok(())
    }
}

/// `count` heartbeat workers named `heartbeat-0`, `heartbeat-1`, ...
pub fn heartbeats(count: usize, interval: Duration) -> Vec<Arc<Heartbeat>> {
    (0..count)
        .map(|i| Arc::new(Heartbeat::new(format!("heartbeat-{i}"), interval)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn beats_until_stopped() {
        let worker = Arc::new(Heartbeat::new("heartbeat-0", Duration::from_secs(1)));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(stop_rx).await }
        });

        // Ticks at t=0, 1, 2, 3.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(worker.beats(), 4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(worker.beats(), 4);
    }

    #[tokio::test]
    async fn already_stopped_exits_immediately() {
        let worker = Heartbeat::new("heartbeat-0", Duration::from_secs(60));
        let (_stop_tx, stop_rx) = watch::channel(true);
        worker.run(stop_rx).await.unwrap();
        assert_eq!(worker.beats(), 0);
    }

    #[test]
    fn names_are_numbered() {
        let workers = heartbeats(3, Duration::from_secs(1));
        let names: Vec<_> = workers.iter().map(|w| w.name().to_string()).collect();
        assert_eq!(names, ["heartbeat-0", "heartbeat-1", "heartbeat-2"]);
    }
}
