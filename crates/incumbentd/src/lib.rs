//! incumbentd — runs a set of workers only while this replica holds the
//! leader lease.
//!
//! The binary in `main.rs` is a thin CLI over these modules:
//! - [`config`]: config file and flag resolution
//! - [`store`]: `--store` parsing and backend selection
//! - [`workers`]: built-in heartbeat workers
//! - [`daemon`]: the `run` lifecycle

pub mod config;
pub mod daemon;
pub mod store;
pub mod workers;
