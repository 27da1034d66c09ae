//! redb table definitions for the lease store.
//!
//! Keys are `{scope}/{name}`; values are JSON-serialized `VersionedLease`.

use redb::TableDefinition;

/// Lease records keyed by `{scope}/{name}`.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
