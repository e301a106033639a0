//! Named breakers created on first use
//!
//! One [`Registry`] is owned by the application and passed to whatever needs
//! to protect a dependency. Every breaker it creates is stamped from the same
//! [`CircuitBuilder`] template, so they share configuration, storage backend
//! and callbacks.

use crate::builder::CircuitBuilder;
use crate::callbacks::Fields;
use crate::circuit::{CallOptions, CircuitBreaker, CircuitHandle};
use crate::config::Config;
use crate::context::CallContext;
use crate::errors::{CircuitError, ConfigError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Map from dependency name to its breaker
#[derive(Debug)]
pub struct Registry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    template: CircuitBuilder,
}

impl Registry {
    /// Create a registry whose breakers are built from `template`
    ///
    /// The template is validated once here so later lookups cannot fail.
    pub fn new(template: CircuitBuilder) -> Result<Self, ConfigError> {
        template.validate()?;
        Ok(Self {
            breakers: Mutex::new(HashMap::new()),
            template,
        })
    }

    /// Registry with default configuration and in-process state
    pub fn with_defaults() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            template: CircuitBuilder::template(),
        }
    }

    /// Breaker for `name`, creating it from the template on first use
    ///
    /// Concurrent first calls for the same name all receive the same instance.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();

        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(self.template.renamed(name).assemble());
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        tracing::debug!(circuit = name, "circuit created");
        breaker
    }

    /// Breaker for `name`, creating it with `config` instead of the template's
    ///
    /// An existing breaker is returned as is; `config` only applies on creation.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: Config,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let mut breakers = self.breakers.lock();

        if let Some(breaker) = breakers.get(name) {
            return Ok(Arc::clone(breaker));
        }

        let builder = self.template.renamed(name).config(config);
        builder.validate()?;

        let breaker = Arc::new(builder.assemble());
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        tracing::debug!(circuit = name, "circuit created");
        Ok(breaker)
    }

    /// Handle on the breaker for `name` that attaches `fields` to the
    /// transitions its own calls cause
    ///
    /// Fields show up in logs and callbacks; never put secrets in them.
    pub fn breaker_for(&self, name: &str, fields: Fields) -> CircuitHandle {
        self.get_or_create(name).with_fields(fields)
    }

    /// Breaker for `name` if one has been created
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.breakers.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }

    /// Names of all created breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `work` through the breaker named `name`
    ///
    /// The registry lock is released before the breaker is consulted.
    pub fn execute<T, E, F>(
        &self,
        ctx: &CallContext,
        name: &str,
        work: F,
        options: CallOptions<T, E>,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(&CallContext) -> Result<T, E>,
        E: 'static,
    {
        self.get_or_create(name).execute(ctx, work, options)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::StateChange;
    use crate::errors::RejectReason;
    use crate::machine::BreakerState;
    use crate::storage::{MemorySharedStore, StorageBackend};
    use std::sync::Barrier;
    use std::time::Duration;

    fn tripping_template() -> CircuitBuilder {
        CircuitBuilder::template()
            .failure_threshold(2)
            .request_volume(2)
            .cooldown(Duration::from_secs(60))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = Registry::with_defaults();

        assert!(Arc::ptr_eq(
            &registry.get_or_create("payments"),
            &registry.get_or_create("payments")
        ));
        assert_eq!(registry.len(), 1);

        let _ = registry.get_or_create("search");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["payments", "search"]);
    }

    #[test]
    fn test_concurrent_first_use_creates_one_breaker() {
        let registry = Registry::with_defaults();
        let barrier = Barrier::new(8);

        let created: Vec<Arc<CircuitBreaker>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get_or_create("inventory")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(created.iter().all(|b| Arc::ptr_eq(b, &created[0])));
    }

    #[test]
    fn test_breakers_are_independent() {
        let registry = Registry::new(tripping_template()).unwrap();
        let ctx = CallContext::background();

        for _ in 0..2 {
            let _ = registry.execute(&ctx, "flaky", |_| Err::<(), _>("down"), CallOptions::new());
        }

        assert!(registry.get("flaky").unwrap().is_open());

        let healthy = registry.execute(&ctx, "healthy", |_| Ok::<_, &str>(1), CallOptions::new());
        assert_eq!(healthy.unwrap(), 1);
        assert!(registry.get("healthy").unwrap().is_closed());
    }

    #[test]
    fn test_execute_rejects_once_open_and_uses_fallback() {
        let registry = Registry::new(tripping_template()).unwrap();
        let ctx = CallContext::background();

        for _ in 0..2 {
            let _ = registry.execute(&ctx, "api", |_| Err::<&str, _>("down"), CallOptions::new());
        }

        let mut ran = false;
        let result = registry.execute(
            &ctx,
            "api",
            |_| {
                ran = true;
                Ok::<_, &str>("live")
            },
            CallOptions::new().with_fallback(|fb| {
                assert!(matches!(
                    fb.cause,
                    crate::circuit::FallbackCause::Rejected(RejectReason::Open { .. })
                ));
                Ok("cached")
            }),
        );

        assert!(!ran);
        assert_eq!(result.unwrap(), "cached");
    }

    #[test]
    fn test_get_or_create_with_validates_and_keeps_existing() {
        let registry = Registry::with_defaults();

        let bad = Config {
            probe_limit: 0,
            ..Config::default()
        };
        assert!(matches!(
            registry.get_or_create_with("api", bad),
            Err(ConfigError::ZeroProbeLimit)
        ));
        assert!(!registry.contains("api"));

        let custom = Config {
            failure_threshold: Some(9),
            ..Config::default()
        };
        let created = registry.get_or_create_with("api", custom).unwrap();
        assert_eq!(created.config().failure_threshold, Some(9));

        let again = registry.get_or_create_with("api", Config::default()).unwrap();
        assert!(Arc::ptr_eq(&created, &again));
        assert_eq!(again.config().failure_threshold, Some(9));
    }

    #[test]
    fn test_new_rejects_invalid_template() {
        assert!(matches!(
            Registry::new(CircuitBuilder::template().max_concurrency(0)),
            Err(ConfigError::ZeroBulkheadLimit)
        ));
    }

    #[test]
    fn test_breaker_for_attaches_fields_to_callbacks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let template = tripping_template().on_state_change(move |change: &StateChange<'_>| {
            seen_clone.lock().push((
                change.circuit.to_string(),
                change.fields.get("request_id").cloned(),
                change.to,
            ));
        });
        let registry = Registry::new(template).unwrap();

        let mut fields = Fields::new();
        fields.insert("request_id".to_string(), "req-42".to_string());
        let breaker = registry.breaker_for("billing", fields);

        for _ in 0..2 {
            let _ = breaker.call(|| Err::<(), _>("down"));
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            (
                "billing".to_string(),
                Some("req-42".to_string()),
                BreakerState::Open
            )
        );
    }

    #[test]
    fn test_breaker_for_keeps_callers_fields_apart() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let template = tripping_template().on_state_change(move |change: &StateChange<'_>| {
            seen_clone.lock().push(change.fields.get("request_id").cloned());
        });
        let registry = Registry::new(template).unwrap();

        let request = |id: &str| Fields::from([("request_id".to_string(), id.to_string())]);
        let first = registry.breaker_for("billing", request("req-1"));
        let second = registry.breaker_for("billing", request("req-2"));
        assert!(Arc::ptr_eq(first.breaker(), second.breaker()));

        let _ = second.call(|| Err::<(), _>("down"));
        let _ = first.call(|| Err::<(), _>("down"));

        // The call that tripped the breaker was made through the first handle
        assert_eq!(seen.lock().as_slice(), &[Some("req-1".to_string())]);
    }

    #[test]
    fn test_registries_share_distributed_state() {
        let shared = Arc::new(MemorySharedStore::new());
        let template =
            tripping_template().storage(StorageBackend::distributed(shared.clone()));

        let process_a = Registry::new(template.clone()).unwrap();
        let process_b = Registry::new(template).unwrap();

        let _ = process_a.get_or_create("db").call(|| Err::<(), _>("down"));
        let _ = process_b.get_or_create("db").call(|| Err::<(), _>("down"));

        assert_eq!(process_a.get_or_create("db").state(), BreakerState::Open);
        assert_eq!(process_b.get_or_create("db").state(), BreakerState::Open);
    }
}
