//! incumbent-state — lease records and the stores that hold them.
//!
//! A lease is a single named record that says which candidate currently
//! leads and until when. Every backend offers the same two operations:
//! a plain read and a compare-and-swap write guarded by a version token.
//! Mutual exclusion between replicas comes entirely from that
//! compare-and-swap; nothing here takes a distributed lock.
//!
//! # Backends
//!
//! ```text
//! LeaseStore (trait)
//!   ├── MemoryLeaseStore  — mutex-guarded map, one process
//!   ├── RedbLeaseStore    — embedded redb file, survives restarts
//!   └── RedisLeaseStore   — shared Redis hash, Lua compare-and-swap
//! ```
//!
//! Records are JSON-serialized in every backend so that a lease written by
//! one daemon version can be read by another.

pub mod error;
pub mod memory;
pub mod redb_store;
pub mod redis_store;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryLeaseStore;
pub use redb_store::RedbLeaseStore;
pub use redis_store::RedisLeaseStore;
pub use store::LeaseStore;
pub use types::*;
