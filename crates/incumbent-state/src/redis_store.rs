//! Redis-backed lease store shared by replicas on different hosts.

use async_trait::async_trait;
use redis::Script;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::{LeaseKey, LeaseRecord, VersionedLease};

// Returns {1, new_version} on success, {0, current_version} on conflict.
// An absent hash has version 0.
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], 'version') or '0')
if current ~= tonumber(ARGV[1]) then
  return {0, current}
end
local next_version = current + 1
redis.call('HSET', KEYS[1], 'version', next_version, 'record', ARGV[2])
return {1, next_version}
"#;

/// Redis implementation of [`LeaseStore`](crate::LeaseStore).
///
/// Each lease is one hash with `version` and `record` fields. Writes go
/// through a Lua script, which Redis runs atomically.
#[derive(Clone)]
pub struct RedisLeaseStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLeaseStore {
    /// Creates one store adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    /// Open a client from a `redis://` URL.
    pub fn open(url: &str, key_prefix: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|error| StoreError::Open(format!("invalid redis url: {error}")))?;
        Ok(Self::new(client, key_prefix))
    }

    fn key_for(&self, key: &LeaseKey) -> String {
        format!("{}:{}", self.key_prefix, key.table_key())
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| StoreError::Unavailable(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl crate::LeaseStore for RedisLeaseStore {
    async fn read(&self, key: &LeaseKey) -> StoreResult<Option<VersionedLease>> {
        let redis_key = self.key_for(key);
        let mut connection = self.connection().await?;

        let (version, record): (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(redis_key.as_str())
            .arg("version")
            .arg("record")
            .query_async(&mut connection)
            .await
            .map_err(|error| StoreError::Unavailable(format!("failed to read lease: {error}")))?;

        match (version, record) {
            (Some(version), Some(record)) => {
                let record: LeaseRecord = serde_json::from_str(&record)
                    .map_err(|error| StoreError::Deserialize(error.to_string()))?;
                Ok(Some(VersionedLease { version, record }))
            }
            _ => Ok(None),
        }
    }

    async fn conditional_update(
        &self,
        record: &LeaseRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let key = record.key();
        let redis_key = self.key_for(&key);
        let payload =
            serde_json::to_string(record).map_err(|error| StoreError::Serialize(error.to_string()))?;
        let mut connection = self.connection().await?;

        let (applied, version): (i64, u64) = Script::new(COMPARE_AND_SWAP_SCRIPT)
            .key(redis_key.as_str())
            .arg(expected_version.unwrap_or(0))
            .arg(payload)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| StoreError::Unavailable(format!("failed to write lease: {error}")))?;

        if applied == 0 {
            return Err(StoreError::Conflict {
                key: key.table_key(),
                expected: expected_version,
                actual: (version > 0).then_some(version),
            });
        }

        debug!(key = %redis_key, version, holder = ?record.holder_identity, "lease written to redis");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        let store = RedisLeaseStore::open("redis://127.0.0.1:6379", "incumbent").unwrap();
        let key = LeaseKey::new("default", "controller-lock").unwrap();
        assert_eq!(store.key_for(&key), "incumbent:default/controller-lock");
    }

    #[test]
    fn invalid_url_is_open_error() {
        let err = RedisLeaseStore::open("not a url", "incumbent").err().unwrap();
        assert!(matches!(err, StoreError::Open(_)));
    }
}
