//! Lease store selection from a `--store` value.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{info, warn};

use incumbent_state::{LeaseStore, MemoryLeaseStore, RedbLeaseStore, RedisLeaseStore};

/// Prefix for every Redis key the daemon writes.
pub const REDIS_KEY_PREFIX: &str = "incumbent";

/// `memory`, `redb:<path>`, or a `redis://` / `rediss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSpec {
    Memory,
    Redb(PathBuf),
    Redis(String),
}

impl FromStr for StoreSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory" {
            return Ok(StoreSpec::Memory);
        }
        if let Some(path) = s.strip_prefix("redb:") {
            if path.is_empty() {
                bail!("redb store needs a path, e.g. redb:/var/lib/incumbent/leases.redb");
            }
            return Ok(StoreSpec::Redb(PathBuf::from(path)));
        }
        if s.starts_with("redis://") || s.starts_with("rediss://") {
            return Ok(StoreSpec::Redis(s.to_string()));
        }
        bail!("unknown store {s:?} (expected memory, redb:<path>, or redis://...)")
    }
}

impl fmt::Display for StoreSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSpec::Memory => write!(f, "memory"),
            StoreSpec::Redb(path) => write!(f, "redb:{}", path.display()),
            StoreSpec::Redis(url) => write!(f, "{url}"),
        }
    }
}

impl StoreSpec {
    /// Open the named backend.
    pub fn open(&self) -> anyhow::Result<Arc<dyn LeaseStore>> {
        match self {
            StoreSpec::Memory => {
                warn!("using in-memory lease store; leases are not shared with other processes");
                Ok(Arc::new(MemoryLeaseStore::new()))
            }
            StoreSpec::Redb(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let store = RedbLeaseStore::open(path)?;
                info!(path = ?path, "redb lease store opened");
                Ok(Arc::new(store))
            }
            StoreSpec::Redis(url) => {
                let store = RedisLeaseStore::open(url, REDIS_KEY_PREFIX)?;
                info!(prefix = REDIS_KEY_PREFIX, "redis lease store configured");
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_backend() {
        assert_eq!("memory".parse::<StoreSpec>().unwrap(), StoreSpec::Memory);
        assert_eq!(
            "redb:/var/lib/incumbent/leases.redb".parse::<StoreSpec>().unwrap(),
            StoreSpec::Redb("/var/lib/incumbent/leases.redb".into())
        );
        assert_eq!(
            "redis://127.0.0.1:6379/0".parse::<StoreSpec>().unwrap(),
            StoreSpec::Redis("redis://127.0.0.1:6379/0".to_string())
        );
    }

    #[test]
    fn rejects_unknown_and_incomplete() {
        assert!("etcd://localhost".parse::<StoreSpec>().is_err());
        assert!("redb:".parse::<StoreSpec>().is_err());
        assert!("".parse::<StoreSpec>().is_err());
    }

    #[test]
    fn display_round_trips_for_logs() {
        for raw in ["memory", "redb:leases.redb", "rediss://cache:6380"] {
            assert_eq!(raw.parse::<StoreSpec>().unwrap().to_string(), raw);
        }
    }

    #[test]
    fn opens_redb_creating_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("leases.redb");
        let spec = StoreSpec::Redb(path.clone());
        spec.open().unwrap();
        assert!(path.exists());
    }
}
