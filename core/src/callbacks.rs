//! Callback system for circuit breaker state transitions

use crate::machine::{BreakerState, Transition};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ambient metadata attached to state-change notifications
///
/// Rendered straight into logs: never put credentials or personal data here.
pub type Fields = BTreeMap<String, String>;

/// A state transition, as delivered to `on_state_change`
#[derive(Debug, Clone, Copy)]
pub struct StateChange<'a> {
    pub circuit: &'a str,
    pub fields: &'a Fields,
    pub from: BreakerState,
    pub to: BreakerState,
}

type StateChangeFn = Arc<dyn Fn(&StateChange<'_>) + Send + Sync>;
type NameFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker events
///
/// All callbacks run synchronously on the thread that caused the transition,
/// after the state lock has been released. Keep them fast.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_state_change: Option<StateChangeFn>,
    pub on_open: Option<NameFn>,
    pub on_close: Option<NameFn>,
    pub on_half_open: Option<NameFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a transition to the log and every registered callback
    pub fn notify(&self, circuit: &str, fields: &Fields, transition: Transition) {
        if transition.from == transition.to {
            return;
        }

        tracing::debug!(
            circuit,
            from = %transition.from,
            to = %transition.to,
            fields = ?fields,
            "state transition"
        );

        if let Some(ref callback) = self.on_state_change {
            callback(&StateChange {
                circuit,
                fields,
                from: transition.from,
                to: transition.to,
            });
        }

        let specific = match transition.to {
            BreakerState::Open => &self.on_open,
            BreakerState::Closed => &self.on_close,
            BreakerState::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = specific {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn on_change<F>(f: F) -> Option<StateChangeFn>
    where
        F: Fn(&StateChange<'_>) + Send + Sync + 'static,
    {
        Some(Arc::new(f))
    }

    #[test]
    fn test_notify_dispatches_to_unified_and_specific_callbacks() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let opened = Arc::new(Mutex::new(Vec::new()));

        let changes_clone = changes.clone();
        let opened_clone = opened.clone();
        let callbacks = Callbacks {
            on_state_change: on_change(move |change| {
                changes_clone.lock().push((
                    change.circuit.to_string(),
                    change.fields.get("request_id").cloned(),
                    change.from,
                    change.to,
                ));
            }),
            on_open: Some(Arc::new(move |name: &str| {
                opened_clone.lock().push(name.to_string());
            })),
            ..Default::default()
        };

        let mut fields = Fields::new();
        fields.insert("request_id".to_string(), "abc".to_string());

        callbacks.notify(
            "api",
            &fields,
            Transition {
                from: BreakerState::Closed,
                to: BreakerState::Open,
            },
        );

        assert_eq!(
            changes.lock().as_slice(),
            &[(
                "api".to_string(),
                Some("abc".to_string()),
                BreakerState::Closed,
                BreakerState::Open
            )]
        );
        assert_eq!(opened.lock().as_slice(), &["api".to_string()]);
    }

    #[test]
    fn test_same_state_is_not_announced() {
        let called = Arc::new(Mutex::new(0));
        let called_clone = called.clone();
        let callbacks = Callbacks {
            on_state_change: on_change(move |_| {
                *called_clone.lock() += 1;
            }),
            ..Default::default()
        };

        callbacks.notify(
            "api",
            &Fields::new(),
            Transition {
                from: BreakerState::Open,
                to: BreakerState::Open,
            },
        );
        assert_eq!(*called.lock(), 0);
    }

    #[test]
    fn test_debug_hides_closures() {
        let callbacks = Callbacks {
            on_close: Some(Arc::new(|_: &str| {})),
            ..Default::default()
        };
        let rendered = format!("{:?}", callbacks);
        assert!(rendered.contains("on_close: true"));
        assert!(rendered.contains("on_open: false"));
    }
}
