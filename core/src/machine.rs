//! Breaker state machine
//!
//! The transition logic operates on a plain [`Snapshot`] so the same rules
//! apply whether the snapshot lives behind a local mutex or in a shared
//! external store. Callers hold the store's critical section while calling
//! [`admit`] and [`record`]; neither function blocks or runs user code.
//!
//! ```text
//! Closed ──[should_trip]──────────────> Open
//!   ▲                                     │
//!   │                                     │ [cooldown elapsed]
//!   │                                     ▼
//!   └──[should_close]──────────────── HalfOpen
//!          [any probe failure] ─────────> Open
//! ```

use crate::config::Config;
use crate::errors::RejectReason;
use crate::window::Counts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete mutable state of one breaker
///
/// This is also the persisted record of the distributed backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: BreakerState,
    pub counts: Counts,
    /// Clock offset of the last state change
    pub last_transition: Duration,
    /// Cooldown chosen (with jitter) when the breaker last opened
    pub open_for: Duration,
    /// Probes admitted in HalfOpen whose outcome is still pending
    pub probes_in_flight: usize,
    /// Clock offset of the most recent probe admission
    #[serde(default)]
    pub last_probe_at: Duration,
    /// Bumped on every transition; outcomes from older generations are dropped
    pub generation: u64,
}

/// A state change produced by the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Bookkeeping carried by an admitted call until its outcome is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub generation: u64,
    pub probe: bool,
}

/// Classified result of an admitted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Not the dependency's fault; counted neither way
    Ignored,
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(Ticket),
    Rejected(RejectReason),
}

/// Decide whether a call may proceed
///
/// An Open breaker whose cooldown has elapsed (boundary inclusive) moves to
/// HalfOpen and admits the caller as its first probe.
pub fn admit(
    snapshot: &mut Snapshot,
    config: &Config,
    now: Duration,
) -> (Admission, Option<Transition>) {
    match snapshot.state {
        BreakerState::Closed => (
            Admission::Admitted(Ticket {
                generation: snapshot.generation,
                probe: false,
            }),
            None,
        ),
        BreakerState::Open => {
            let elapsed = now.saturating_sub(snapshot.last_transition);
            if elapsed < snapshot.open_for {
                let remaining = snapshot.open_for - elapsed;
                return (Admission::Rejected(RejectReason::Open { remaining }), None);
            }

            let transition = enter(snapshot, BreakerState::HalfOpen, config, now);
            (take_probe(snapshot, now), Some(transition))
        }
        BreakerState::HalfOpen => {
            if snapshot.probes_in_flight >= config.probe_limit
                && now.saturating_sub(snapshot.last_probe_at) >= config.probe_timeout
            {
                // Outcomes that never arrived (lost write, crashed caller) must
                // not hold the slots forever. Late ones are dropped by generation.
                snapshot.probes_in_flight = 0;
                snapshot.generation = snapshot.generation.wrapping_add(1);
            }
            if snapshot.probes_in_flight >= config.probe_limit {
                return (
                    Admission::Rejected(RejectReason::HalfOpenLimitReached {
                        limit: config.probe_limit,
                    }),
                    None,
                );
            }
            (take_probe(snapshot, now), None)
        }
    }
}

/// Apply the outcome of an admitted call
///
/// Returns the transition it caused, if any.
pub fn record(
    snapshot: &mut Snapshot,
    config: &Config,
    now: Duration,
    ticket: Ticket,
    outcome: Outcome,
) -> Option<Transition> {
    if ticket.generation != snapshot.generation {
        // Admitted before the last transition; its slot was already reclaimed.
        return None;
    }

    let transition = match snapshot.state {
        BreakerState::Closed => {
            snapshot.counts.roll(now, config.rolling_window);
            match outcome {
                Outcome::Success => snapshot.counts.record_success(),
                Outcome::Failure => snapshot.counts.record_failure(),
                Outcome::Ignored => {}
            }

            if outcome != Outcome::Ignored && snapshot.counts.should_trip(config) {
                Some(enter(snapshot, BreakerState::Open, config, now))
            } else {
                None
            }
        }
        BreakerState::HalfOpen => match outcome {
            Outcome::Failure => Some(enter(snapshot, BreakerState::Open, config, now)),
            Outcome::Success => {
                snapshot.counts.record_success();
                if snapshot.counts.should_close(config) {
                    Some(enter(snapshot, BreakerState::Closed, config, now))
                } else {
                    None
                }
            }
            Outcome::Ignored => None,
        },
        // Entering Open bumps the generation, so no live ticket can be Open.
        BreakerState::Open => None,
    };

    if transition.is_none() && ticket.probe {
        snapshot.probes_in_flight = snapshot.probes_in_flight.saturating_sub(1);
    }

    transition
}

/// Force the breaker back to Closed with fresh counters
pub fn force_close(snapshot: &mut Snapshot, config: &Config, now: Duration) -> Option<Transition> {
    if snapshot.state == BreakerState::Closed {
        snapshot.counts.reset(now);
        return None;
    }
    Some(enter(snapshot, BreakerState::Closed, config, now))
}

fn take_probe(snapshot: &mut Snapshot, now: Duration) -> Admission {
    snapshot.probes_in_flight += 1;
    snapshot.last_probe_at = now;
    Admission::Admitted(Ticket {
        generation: snapshot.generation,
        probe: true,
    })
}

fn enter(snapshot: &mut Snapshot, to: BreakerState, config: &Config, now: Duration) -> Transition {
    let from = snapshot.state;

    snapshot.state = to;
    snapshot.last_transition = now;
    snapshot.counts.reset(now);
    snapshot.probes_in_flight = 0;
    snapshot.generation = snapshot.generation.wrapping_add(1);
    if to == BreakerState::Open {
        snapshot.open_for = config.cooldown_with_jitter();
    }

    Transition { from, to }
}
