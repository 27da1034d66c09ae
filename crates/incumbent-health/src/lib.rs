//! incumbent-health — liveness reporting for a leader-elected process.
//!
//! A replica that loses leadership must stop serving and be recycled by
//! its supervisor. This crate holds the one bit that says so and serves it
//! on `GET /live`:
//!
//! | State | Status | Body |
//! |---|---|---|
//! | healthy | 200 | `alive` |
//! | unhealthy | 500 | reason the process was marked unhealthy |
//!
//! The flag starts healthy and, once cleared, stays cleared for the
//! lifetime of the process.

pub mod handlers;
pub mod state;

pub use state::HealthState;

use axum::Router;
use axum::routing::get;

/// Build the liveness router.
pub fn router(health: HealthState) -> Router {
    Router::new()
        .route("/live", get(handlers::live))
        .with_state(health)
}
