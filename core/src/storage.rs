//! State stores for circuit breaker snapshots
//!
//! This module provides the two backends behind [`StateStore`]:
//! - `LocalStore`: snapshot in process memory behind one mutex per breaker
//! - `DistributedStore`: snapshot in a [`SharedStore`] (e.g. Redis), mutated
//!   only while holding a per-circuit lock taken with a single attempt
//!
//! A `StateStore` only ever runs the short, non-blocking state machine step
//! inside its critical section. The protected work runs outside it.

use crate::config::Config;
use crate::errors::StoreError;
use crate::machine::Snapshot;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Holder of one breaker's mutable state
pub trait StateStore: Send + Sync + Debug {
    /// Run `update` against the snapshot inside the store's critical section
    fn update(
        &self,
        circuit: &str,
        update: &mut dyn FnMut(&mut Snapshot),
    ) -> Result<(), StoreError>;

    /// Read a copy of the current snapshot
    fn load(&self, circuit: &str) -> Result<Snapshot, StoreError>;
}

/// In-process snapshot guarded by a mutex
#[derive(Debug, Default)]
pub struct LocalStore {
    state: Mutex<Snapshot>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for LocalStore {
    fn update(
        &self,
        _circuit: &str,
        update: &mut dyn FnMut(&mut Snapshot),
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        update(&mut state);
        Ok(())
    }

    fn load(&self, _circuit: &str) -> Result<Snapshot, StoreError> {
        Ok(self.state.lock().clone())
    }
}

/// Opaque proof of lock ownership, required to release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of a single lock attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired(LockToken),
    Unavailable,
}

/// External key-value store with expiring locks, shared between processes
pub trait SharedStore: Send + Sync + Debug {
    /// Try once to take the lock at `key`; it expires after `ttl` if never released
    fn try_lock(&self, key: &str, ttl: Duration) -> Result<LockAttempt, StoreError>;

    /// Release the lock if `token` still owns it
    fn unlock(&self, key: &str, token: &LockToken) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Snapshot persisted in a [`SharedStore`] as JSON under `{prefix}:{circuit}`
#[derive(Debug, Clone)]
pub struct DistributedStore {
    shared: Arc<dyn SharedStore>,
    prefix: String,
    lock_ttl: Duration,
}

impl DistributedStore {
    pub fn new(
        shared: Arc<dyn SharedStore>,
        prefix: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            shared,
            prefix: prefix.into(),
            lock_ttl,
        }
    }

    fn record_key(&self, circuit: &str) -> String {
        format!("{}:{}", self.prefix, circuit)
    }

    fn lock_key(&self, circuit: &str) -> String {
        format!("{}:{}:lock", self.prefix, circuit)
    }

    fn read(&self, key: &str) -> Result<Snapshot, StoreError> {
        match self.shared.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Snapshot::default()),
        }
    }

    fn read_modify_write(
        &self,
        key: &str,
        update: &mut dyn FnMut(&mut Snapshot),
    ) -> Result<(), StoreError> {
        let mut snapshot = self.read(key)?;
        update(&mut snapshot);
        self.shared.set(key, &serde_json::to_string(&snapshot)?)
    }
}

impl StateStore for DistributedStore {
    fn update(
        &self,
        circuit: &str,
        update: &mut dyn FnMut(&mut Snapshot),
    ) -> Result<(), StoreError> {
        let lock_key = self.lock_key(circuit);
        let token = match self.shared.try_lock(&lock_key, self.lock_ttl)? {
            LockAttempt::Acquired(token) => token,
            LockAttempt::Unavailable => {
                return Err(StoreError::LockUnavailable {
                    circuit: circuit.to_string(),
                });
            }
        };

        let result = self.read_modify_write(&self.record_key(circuit), update);
        let released = self.shared.unlock(&lock_key, &token);
        result.and(released)
    }

    fn load(&self, circuit: &str) -> Result<Snapshot, StoreError> {
        self.read(&self.record_key(circuit))
    }
}

/// Which backend a breaker keeps its state in
#[derive(Debug, Clone, Default)]
pub enum StorageBackend {
    /// Private to this process
    #[default]
    Local,
    /// Shared with every process using the same store and key prefix
    Distributed {
        store: Arc<dyn SharedStore>,
        key_prefix: String,
    },
}

impl StorageBackend {
    /// Distributed backend with the default `circuit` key prefix
    pub fn distributed(store: Arc<dyn SharedStore>) -> Self {
        StorageBackend::Distributed {
            store,
            key_prefix: "circuit".to_string(),
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, StorageBackend::Distributed { .. })
    }

    pub(crate) fn create(&self, config: &Config) -> Box<dyn StateStore> {
        match self {
            StorageBackend::Local => Box::new(LocalStore::new()),
            StorageBackend::Distributed { store, key_prefix } => Box::new(DistributedStore::new(
                Arc::clone(store),
                key_prefix.clone(),
                config.lock_timeout,
            )),
        }
    }
}

/// In-memory [`SharedStore`] with expiring locks
///
/// Stands in for an external store when several breakers in one process
/// should behave like cooperating processes, and in tests.
#[derive(Debug, Default)]
pub struct MemorySharedStore {
    entries: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, (LockToken, Instant)>>,
    next_token: AtomicU64,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStore for MemorySharedStore {
    fn try_lock(&self, key: &str, ttl: Duration) -> Result<LockAttempt, StoreError> {
        let mut locks = self.locks.lock();
        let now = Instant::now();

        if let Some((_, expires_at)) = locks.get(key)
            && *expires_at > now
        {
            return Ok(LockAttempt::Unavailable);
        }

        let token = LockToken::new(self.next_token.fetch_add(1, Ordering::Relaxed).to_string());
        locks.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(LockAttempt::Acquired(token))
    }

    fn unlock(&self, key: &str, token: &LockToken) -> Result<(), StoreError> {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|(owner, _)| owner == token) {
            locks.remove(key);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
