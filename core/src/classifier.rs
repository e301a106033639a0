//! Failure classification
//!
//! Decides which errors returned by protected work count toward tripping the
//! circuit. Errors classified as "not a failure" (validation errors, caller
//! cancellation) are recorded as ignored outcomes instead.

use std::any::Any;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// How long the failed call ran
    pub duration: Duration,
    /// The caller cancelled its context before the work returned
    pub cancelled: bool,
    /// The caller's deadline passed before the work returned
    pub deadline_exceeded: bool,
}

/// Trait for classifying failures - determines if an error should trip the circuit
///
/// # Examples
///
/// ```rust
/// use fusebox::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct IgnoreCancellation;
///
/// impl FailureClassifier for IgnoreCancellation {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         !ctx.cancelled
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the error should count as a failure, `false` to ignore it.
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that trips on all errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
