//! The `run` lifecycle.
//!
//! 1. Open the lease store
//! 2. Serve `GET /live`
//! 3. Run the election loop, starting workers while leading
//! 4. On SIGINT/SIGTERM, stop the loop (which releases the lease and waits
//!    for workers), then stop the server
//!
//! If the loop ends on its own after a demotion, the server stays up and
//! keeps failing `/live` until the process is recycled.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use incumbent_election::{
    ElectionLoop, LeadershipBinding, LeaseHolder, Runnable, WorkerSupervisor,
};
use incumbent_health::HealthState;
use incumbent_state::LeaseStore;

use crate::config::DaemonConfig;
use crate::workers;

/// Run the daemon until SIGINT or SIGTERM.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let store = config.store.open()?;
    let listener = TcpListener::bind(config.listen).await?;
    serve(config, store, listener, shutdown_signal()).await
}

/// Run the daemon on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    config: DaemonConfig,
    store: Arc<dyn LeaseStore>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    info!(
        identity = %config.identity,
        lease = %config.key,
        store = %config.store,
        workers = config.workers,
        "incumbent daemon starting"
    );

    // ── Election ───────────────────────────────────────────────

    let holder = LeaseHolder::new(
        store,
        config.key.clone(),
        config.identity.clone(),
        config.election.lease_duration,
    );
    let health = HealthState::new();
    let workers: Vec<Arc<dyn Runnable>> = workers::heartbeats(config.workers, config.worker_interval)
        .into_iter()
        .map(|worker| worker as Arc<dyn Runnable>)
        .collect();
    let binding = LeadershipBinding::new(
        config.identity.clone(),
        WorkerSupervisor::new(workers),
        health.clone(),
    );
    let election = ElectionLoop::new(holder, config.election.clone(), binding)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_shutdown = shutdown_rx.clone();

    // ── Health server ──────────────────────────────────────────

    let addr = listener.local_addr()?;
    info!(%addr, "health server listening");
    let router = incumbent_health::router(health);
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stopped| *stopped).await;
            })
            .await
    });

    // ── Election loop ──────────────────────────────────────────

    let mut election_task = tokio::spawn(election.run(shutdown_rx));
    tokio::pin!(shutdown);

    let outcome = tokio::select! {
        _ = &mut shutdown => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            election_task.await
        }
        joined = &mut election_task => {
            if matches!(joined, Ok(Ok(()))) {
                warn!("election loop ended after demotion, waiting to be recycled");
                shutdown.await;
                info!("shutdown signal received");
            }
            joined
        }
    };
    let _ = shutdown_tx.send(true);

    let result = match outcome {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::anyhow!("election task failed: {e}")),
    };
    if let Err(e) = &result {
        error!(error = %e, "election loop failed");
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "health server exited with error"),
        Err(e) => warn!(error = %e, "health server task failed"),
    }

    info!("incumbent daemon stopped");
    result
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
