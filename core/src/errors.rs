//! Error types for circuit breaker operations

use std::error::Error;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a call was short-circuited without running the protected work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Circuit is open; `remaining` is the cooldown left before a probe is allowed
    Open { remaining: Duration },
    /// All half-open probe slots are in use
    HalfOpenLimitReached { limit: usize },
    /// Bulkhead is at capacity
    BulkheadFull { limit: usize },
    /// The shared-state lock could not be taken on the single attempt
    LockUnavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Open { remaining } => {
                write!(f, "circuit is open (retry in {:?})", remaining)
            }
            RejectReason::HalfOpenLimitReached { limit } => {
                write!(f, "half-open probe limit reached (limit: {})", limit)
            }
            RejectReason::BulkheadFull { limit } => {
                write!(f, "bulkhead is full (limit: {})", limit)
            }
            RejectReason::LockUnavailable => write!(f, "shared state lock unavailable"),
        }
    }
}

/// A refused admission, before it is folded into [`CircuitError`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit '{circuit}' rejected the call: {reason}")]
pub struct Rejection {
    pub circuit: String,
    pub reason: RejectReason,
}

/// Errors that can occur during circuit breaker operations
#[derive(Debug, Error)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// The call was short-circuited; the protected work never ran
    #[error("Circuit '{circuit}' rejected the call: {reason}")]
    Rejected { circuit: String, reason: RejectReason },
    /// The wrapped operation (or its fallback) failed
    #[error("Circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call rather than the work failing
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitError::Rejected { .. })
    }

    /// Rejection reason, if this is a short-circuit
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            CircuitError::Rejected { reason, .. } => Some(*reason),
            CircuitError::Execution(_) => None,
        }
    }

    /// The work's own error, if it ran and failed
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::Rejected { .. } => None,
        }
    }
}

impl<E> From<Rejection> for CircuitError<E> {
    fn from(rejection: Rejection) -> Self {
        CircuitError::Rejected {
            circuit: rejection.circuit,
            reason: rejection.reason,
        }
    }
}

/// Configuration rejected at construction time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("probe limit must be at least 1")]
    ZeroProbeLimit,
    #[error("error percent threshold must be within 0..=100, got {0}")]
    ErrorPercentOutOfRange(u8),
    #[error("probe timeout must be longer than zero")]
    ZeroProbeTimeout,
    #[error("rolling window must be longer than zero")]
    ZeroRollingWindow,
    #[error("success threshold must be at least 1")]
    ZeroSuccessThreshold,
    #[error("jitter factor must be within 0.0..=1.0, got {0}")]
    JitterOutOfRange(f64),
    #[error("distributed lock timeout must be longer than zero")]
    ZeroLockTimeout,
    #[error("bulkhead limit must be at least 1")]
    ZeroBulkheadLimit,
}

/// Failures of a state store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another holder owns the lock for this circuit
    #[error("lock for circuit '{circuit}' is held elsewhere")]
    LockUnavailable { circuit: String },
    /// The persisted record could not be encoded or decoded
    #[error("snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// The external store failed
    #[error("state store backend error: {0}")]
    Backend(String),
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
