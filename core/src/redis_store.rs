//! Redis-backed [`SharedStore`]
//!
//! Locks are plain keys set with `NX PX` holding a random token; release
//! deletes the key only if it still holds that token. Snapshot records are
//! JSON strings under their own keys.

use crate::errors::StoreError;
use crate::storage::{LockAttempt, LockToken, SharedStore};
use redis::{Client, Connection, Script};
use std::time::Duration;

const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Shared breaker state kept in Redis
pub struct RedisStore {
    client: Client,
    unlock: Script,
}

impl RedisStore {
    /// Connect lazily to the server at `url` (e.g. `redis://127.0.0.1:6379`)
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_client(Client::open(url)?))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            unlock: Script::new(UNLOCK_SCRIPT),
        }
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        Ok(self.client.get_connection()?)
    }
}

impl SharedStore for RedisStore {
    fn try_lock(&self, key: &str, ttl: Duration) -> Result<LockAttempt, StoreError> {
        let mut conn = self.connection()?;
        let token = LockToken::new(uuid::Uuid::new_v4().to_string());
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query(&mut conn)?;

        Ok(match reply {
            Some(_) => LockAttempt::Acquired(token),
            None => LockAttempt::Unavailable,
        })
    }

    fn unlock(&self, key: &str, token: &LockToken) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: i64 = self
            .unlock
            .key(key)
            .arg(token.as_str())
            .invoke(&mut conn)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection()?;
        Ok(redis::cmd("GET").arg(key).query(&mut conn)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query::<()>(&mut conn)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}
