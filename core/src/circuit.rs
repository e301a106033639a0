//! Circuit breaker execution wrapper
//!
//! `CircuitBreaker` ties the state machine to a state store, a clock, a
//! failure classifier and the notification callbacks. Admission and outcome
//! recording each take the store's critical section once; the protected work
//! runs between them with no lock held.

use crate::{
    builder::CircuitBuilder,
    bulkhead::BulkheadSemaphore,
    callbacks::{Callbacks, Fields},
    classifier::{FailureClassifier, FailureContext},
    clock::Clock,
    config::Config,
    context::CallContext,
    errors::{CircuitError, ConfigError, RejectReason, Rejection, StoreError},
    machine::{self, Admission, BreakerState, Outcome, Snapshot, Ticket, Transition},
    storage::StateStore,
    window::Counts,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Why the fallback is being invoked
#[derive(Debug)]
pub enum FallbackCause<'a, E> {
    /// The breaker short-circuited the call; the work never ran
    Rejected(RejectReason),
    /// The work ran and returned this error
    Failed(&'a E),
}

/// Context provided to fallback closures
#[derive(Debug)]
pub struct FallbackContext<'a, E> {
    pub circuit_name: &'a str,
    /// Breaker state after the call was settled
    pub state: BreakerState,
    pub cause: FallbackCause<'a, E>,
}

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext<'_, E>) -> Result<T, E> + Send>;

/// Options for circuit breaker calls
pub struct CallOptions<T, E> {
    /// Invoked when the call is rejected or the work fails
    pub fallback: Option<FallbackFn<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self { fallback: None }
    }
}

impl<T, E> CallOptions<T, E> {
    /// Create new call options with no fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fallback function
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext<'_, E>) -> Result<T, E> + Send + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }
}

impl<T, E> std::fmt::Debug for CallOptions<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Everything a breaker is assembled from (used by the builder)
pub(crate) struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub store: Box<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
    pub failure_classifier: Option<Arc<dyn FailureClassifier>>,
    pub bulkhead: Option<Arc<BulkheadSemaphore>>,
}

/// Circuit breaker public API
///
/// All methods take `&self`; share a breaker between threads with `Arc`.
pub struct CircuitBreaker {
    context: CircuitContext,
    callbacks: Callbacks,
    fields: Fields,
}

impl CircuitBreaker {
    /// Create a local circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        CircuitBuilder::new(name).config(config).build()
    }

    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
        fields: Fields,
    ) -> Self {
        Self {
            context,
            callbacks,
            fields,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Default metadata passed to state-change callbacks
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Handle on this breaker that reports `fields` with the transitions it causes
    ///
    /// The handle's fields are layered over the breaker's own. State is shared
    /// with every other handle on the same breaker.
    pub fn with_fields(self: &Arc<Self>, fields: Fields) -> CircuitHandle {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        CircuitHandle {
            breaker: Arc::clone(self),
            fields: merged,
        }
    }

    /// Ask for admission without running anything
    ///
    /// The returned [`Permit`] must be settled with [`Permit::record`]; a
    /// permit dropped unsettled counts as an ignored outcome.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejection> {
        self.acquire(&self.fields)
    }

    fn acquire<'a>(&'a self, fields: &'a Fields) -> Result<Permit<'a>, Rejection> {
        let now = self.context.clock.now();
        let mut decision = None;
        let mut transition = None;

        let updated = self.context.store.update(&self.context.name, &mut |snapshot| {
            let (admission, changed) = machine::admit(snapshot, &self.context.config, now);
            decision = Some(admission);
            transition = changed;
        });

        if let Err(err) = updated {
            tracing::warn!(
                circuit = %self.context.name,
                error = %err,
                "state store unavailable, rejecting call"
            );
            return Err(self.rejection(RejectReason::LockUnavailable));
        }
        if let Some(transition) = transition {
            self.notify(transition, fields);
        }

        match decision {
            Some(Admission::Admitted(ticket)) => Ok(Permit {
                breaker: self,
                fields,
                ticket,
                started_at: now,
                settled: false,
            }),
            Some(Admission::Rejected(reason)) => Err(self.rejection(reason)),
            None => Err(self.rejection(RejectReason::LockUnavailable)),
        }
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// The work receives the caller's context and should honor its
    /// cancellation and deadline; the breaker never interrupts it.
    pub fn execute<T, E, F>(
        &self,
        ctx: &CallContext,
        work: F,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(&CallContext) -> Result<T, E>,
        E: 'static,
    {
        self.execute_reporting(&self.fields, ctx, work, options)
    }

    fn execute_reporting<T, E, F>(
        &self,
        fields: &Fields,
        ctx: &CallContext,
        work: F,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(&CallContext) -> Result<T, E>,
        E: 'static,
    {
        let _guard = match &self.context.bulkhead {
            Some(bulkhead) => match bulkhead.try_acquire() {
                Some(guard) => Some(guard),
                None => {
                    let reason = RejectReason::BulkheadFull {
                        limit: bulkhead.limit(),
                    };
                    return self.short_circuit(reason, options);
                }
            },
            None => None,
        };

        let permit = match self.acquire(fields) {
            Ok(permit) => permit,
            Err(rejection) => return self.short_circuit(rejection.reason, options),
        };

        match work(ctx) {
            Ok(value) => {
                permit.record(Outcome::Success);
                Ok(value)
            }
            Err(error) => {
                let outcome = self.classify(ctx, &error, permit.elapsed());
                permit.record(outcome);

                match options.fallback {
                    Some(fallback) => fallback(&FallbackContext {
                        circuit_name: &self.context.name,
                        state: self.state(),
                        cause: FallbackCause::Failed(&error),
                    })
                    .map_err(CircuitError::Execution),
                    None => Err(CircuitError::Execution(error)),
                }
            }
        }
    }

    /// Execute a closure with no context and no fallback
    pub fn call<T, E, F>(&self, work: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        self.execute(&CallContext::background(), |_| work(), CallOptions::new())
    }

    /// Read the stored state
    ///
    /// An Open breaker whose cooldown has elapsed still reads Open until the
    /// next admission moves it to HalfOpen. An unreadable store reads Open.
    pub fn state(&self) -> BreakerState {
        match self.snapshot() {
            Ok(snapshot) => snapshot.state,
            Err(err) => {
                tracing::warn!(circuit = %self.context.name, error = %err, "state unreadable");
                BreakerState::Open
            }
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == BreakerState::HalfOpen
    }

    pub fn counts(&self) -> Result<Counts, StoreError> {
        Ok(self.snapshot()?.counts)
    }

    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        self.context.store.load(&self.context.name)
    }

    /// Clear all counters and force the circuit to Closed
    pub fn reset(&self) -> Result<(), StoreError> {
        let now = self.context.clock.now();
        let mut transition = None;

        self.context.store.update(&self.context.name, &mut |snapshot| {
            transition = machine::force_close(snapshot, &self.context.config, now);
        })?;

        if let Some(transition) = transition {
            self.notify(transition, &self.fields);
        }
        Ok(())
    }

    fn record(&self, ticket: Ticket, outcome: Outcome, fields: &Fields) {
        let now = self.context.clock.now();
        let mut transition = None;

        let updated = self.context.store.update(&self.context.name, &mut |snapshot| {
            transition = machine::record(snapshot, &self.context.config, now, ticket, outcome);
        });

        if let Err(err) = updated {
            tracing::warn!(
                circuit = %self.context.name,
                error = %err,
                ?outcome,
                "outcome not recorded"
            );
        }
        if let Some(transition) = transition {
            self.notify(transition, fields);
        }
    }

    fn classify<E: 'static>(&self, ctx: &CallContext, error: &E, duration: Duration) -> Outcome {
        let Some(classifier) = &self.context.failure_classifier else {
            return Outcome::Failure;
        };

        let failure = FailureContext {
            circuit_name: &self.context.name,
            error: error as &dyn Any,
            duration,
            cancelled: ctx.is_cancelled(),
            deadline_exceeded: ctx.is_expired(),
        };
        if classifier.should_trip(&failure) {
            Outcome::Failure
        } else {
            Outcome::Ignored
        }
    }

    fn short_circuit<T, E>(
        &self,
        reason: RejectReason,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>> {
        tracing::trace!(circuit = %self.context.name, %reason, "call short-circuited");

        match options.fallback {
            Some(fallback) => fallback(&FallbackContext {
                circuit_name: &self.context.name,
                state: self.state(),
                cause: FallbackCause::Rejected(reason),
            })
            .map_err(CircuitError::Execution),
            None => Err(self.rejection(reason).into()),
        }
    }

    fn rejection(&self, reason: RejectReason) -> Rejection {
        Rejection {
            circuit: self.context.name.clone(),
            reason,
        }
    }

    fn notify(&self, transition: Transition, fields: &Fields) {
        self.callbacks.notify(&self.context.name, fields, transition);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("config", &self.context.config)
            .field("store", &self.context.store)
            .field("clock", &self.context.clock)
            .field(
                "failure_classifier",
                &self
                    .context
                    .failure_classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .field("bulkhead", &self.context.bulkhead)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
///
/// Consumed by [`Permit::record`], so one admission is recorded at most once.
#[derive(Debug)]
#[must_use = "an unrecorded permit counts as an ignored outcome"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    fields: &'a Fields,
    ticket: Ticket,
    started_at: Duration,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this call was admitted as a half-open probe
    pub fn is_probe(&self) -> bool {
        self.ticket.probe
    }

    /// Time since admission, by the breaker's clock
    pub fn elapsed(&self) -> Duration {
        self.breaker
            .context
            .clock
            .now()
            .saturating_sub(self.started_at)
    }

    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.ticket, outcome, self.fields);
    }

    pub fn success(self) {
        self.record(Outcome::Success);
    }

    pub fn failure(self) {
        self.record(Outcome::Failure);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.ticket, Outcome::Ignored, self.fields);
        }
    }
}

/// A shared breaker paired with one caller's notification fields
///
/// Obtained from [`CircuitBreaker::with_fields`] or
/// [`crate::Registry::breaker_for`]. Transitions caused by calls made through
/// this handle report its fields, never another caller's.
#[derive(Debug, Clone)]
pub struct CircuitHandle {
    breaker: Arc<CircuitBreaker>,
    fields: Fields,
}

impl CircuitHandle {
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejection> {
        self.breaker.acquire(&self.fields)
    }

    /// Same as [`CircuitBreaker::execute`], reporting this handle's fields
    pub fn execute<T, E, F>(
        &self,
        ctx: &CallContext,
        work: F,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(&CallContext) -> Result<T, E>,
        E: 'static,
    {
        self.breaker
            .execute_reporting(&self.fields, ctx, work, options)
    }

    pub fn call<T, E, F>(&self, work: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        self.execute(&CallContext::background(), |_| work(), CallOptions::new())
    }

    pub fn state(&self) -> BreakerState {
        self.breaker.state()
    }
}
