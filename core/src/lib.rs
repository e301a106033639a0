//! Fusebox - circuit breaker engine for calls to unreliable dependencies
//!
//! This crate provides:
//! - Rolling-window failure accounting with count and percentage thresholds
//! - A Closed → Open → HalfOpen state machine with a bounded number of probes
//! - Local (in-process) or distributed (shared store) breaker state
//! - A registry creating one breaker per dependency name on first use
//!
//! # Example
//!
//! ```rust
//! use fusebox::{CallContext, CallOptions, CircuitBuilder, Registry};
//! use std::time::Duration;
//!
//! let registry = Registry::new(
//!     CircuitBuilder::template()
//!         .failure_threshold(5)
//!         .request_volume(10)
//!         .cooldown(Duration::from_secs(30))
//!         .on_open(|name| println!("Circuit {} opened!", name)),
//! )
//! .unwrap();
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(2));
//! let result = registry.execute(
//!     &ctx,
//!     "inventory",
//!     |_ctx| Ok::<_, String>("in stock"),
//!     CallOptions::new().with_fallback(|_| Ok("unknown")),
//! );
//!
//! assert_eq!(result.unwrap(), "in stock");
//! assert!(registry.get_or_create("inventory").is_closed());
//! ```

pub mod builder;
pub mod bulkhead;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod machine;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod registry;
pub mod storage;
pub mod window;

pub use builder::CircuitBuilder;
pub use bulkhead::{BulkheadGuard, BulkheadSemaphore};
pub use callbacks::{Callbacks, Fields, StateChange};
pub use circuit::{
    CallOptions, CircuitBreaker, CircuitHandle, FallbackCause, FallbackContext, Permit,
};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use config::Config;
pub use context::CallContext;
pub use errors::{CircuitError, ConfigError, RejectReason, Rejection, StoreError};
pub use machine::{BreakerState, Outcome, Snapshot};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use registry::Registry;
pub use storage::{
    DistributedStore, LocalStore, LockAttempt, LockToken, MemorySharedStore, SharedStore,
    StateStore, StorageBackend,
};
pub use window::Counts;
