//! Builder API for ergonomic circuit breaker configuration

use crate::{
    bulkhead::BulkheadSemaphore,
    callbacks::{Callbacks, Fields, StateChange},
    circuit::{CircuitBreaker, CircuitContext},
    classifier::{FailureClassifier, FailureContext, PredicateClassifier},
    clock::{Clock, MonotonicClock, SystemClock},
    config::Config,
    errors::ConfigError,
    storage::StorageBackend,
};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
///
/// A builder is also the template a [`crate::Registry`] stamps breakers from.
#[derive(Clone)]
pub struct CircuitBuilder {
    name: String,
    config: Config,
    storage: StorageBackend,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    max_concurrency: Option<usize>,
    callbacks: Callbacks,
    fields: Fields,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            storage: StorageBackend::Local,
            clock: None,
            failure_classifier: None,
            max_concurrency: None,
            callbacks: Callbacks::new(),
            fields: Fields::new(),
        }
    }

    /// Builder with no name, for use as a registry template
    pub fn template() -> Self {
        Self::new("")
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the absolute failure threshold (failures in the window to open circuit)
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = Some(threshold);
        self
    }

    /// Disable absolute failure threshold (use only percentage-based)
    pub fn disable_failure_threshold(mut self) -> Self {
        self.config.failure_threshold = None;
        self
    }

    /// Set the failure percentage threshold (0-100)
    pub fn error_percent(mut self, percent: u8) -> Self {
        self.config.error_percent_threshold = Some(percent);
        self
    }

    /// Set minimum number of calls in the window before tripping is considered
    pub fn request_volume(mut self, calls: u64) -> Self {
        self.config.request_volume_threshold = calls;
        self
    }

    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.config.rolling_window = window;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Set the number of concurrent probes allowed while half-open
    pub fn probe_limit(mut self, limit: usize) -> Self {
        self.config.probe_limit = limit;
        self
    }

    /// Set how long full probe slots wait for an outcome before being reclaimed
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;
        self
    }

    /// Set the success threshold (consecutive probe successes needed to close)
    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = Some(threshold);
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Set the lock TTL used by the distributed backend
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Choose where breaker state lives
    pub fn storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    /// Set a custom clock
    ///
    /// Defaults to a monotonic clock for local storage and the system clock
    /// for distributed storage.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// Use this to ignore "expected" errors like validation failures or client
    /// errors (4xx), while still tripping on server errors (5xx).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fusebox::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Shorthand for [`failure_classifier`](Self::failure_classifier) with a closure
    pub fn failure_predicate<F>(self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.failure_classifier(Arc::new(PredicateClassifier::new(predicate)))
    }

    /// Set maximum concurrency limit (bulkheading)
    ///
    /// Calls beyond the limit are rejected with `BulkheadFull` without
    /// affecting breaker state.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Set callback for every state transition
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&StateChange<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Metadata passed to state-change callbacks (no sensitive data)
    pub fn fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Check the configuration without building
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::ZeroBulkheadLimit);
        }
        Ok(())
    }

    /// Build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.validate()?;
        Ok(self.assemble())
    }

    /// Copy of this builder under another name
    pub(crate) fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Build without validating; callers validate first
    pub(crate) fn assemble(self) -> CircuitBreaker {
        let clock = self.clock.unwrap_or_else(|| {
            if self.storage.is_distributed() {
                Arc::new(SystemClock)
            } else {
                Arc::new(MonotonicClock::new())
            }
        });

        let context = CircuitContext {
            store: self.storage.create(&self.config),
            bulkhead: self
                .max_concurrency
                .and_then(NonZeroUsize::new)
                .map(|limit| Arc::new(BulkheadSemaphore::new(limit))),
            name: self.name,
            config: self.config,
            clock,
            failure_classifier: self.failure_classifier,
        };

        CircuitBreaker::with_context_and_callbacks(context, self.callbacks, self.fields)
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("clock", &self.clock)
            .field("failure_classifier", &self.failure_classifier.is_some())
            .field("max_concurrency", &self.max_concurrency)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
