//! Time sources for breaker bookkeeping
//!
//! All timestamps stored by a breaker are offsets from the clock's own epoch.
//! Local breakers use a monotonic anchor so NTP adjustments cannot shorten a
//! cooldown. Breakers sharing state across processes need a common epoch and
//! therefore use wall-clock time.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of "now" for a circuit breaker
pub trait Clock: Send + Sync + Debug {
    /// Elapsed time since this clock's epoch
    fn now(&self) -> Duration;
}

/// Monotonic clock anchored at creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Wall clock measured from the Unix epoch
///
/// Every process sharing a distributed breaker must agree on the epoch, so
/// this is the default clock for the distributed backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Manually driven clock for deterministic tests
///
/// Clones share the same time, so a test can keep one handle and pass
/// another to the breaker.
///
/// ```rust
/// use fusebox::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let handle = clock.clone();
/// handle.advance(Duration::from_secs(5));
/// assert_eq!(clock.now(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }

    /// Jump to an absolute offset from the epoch
    pub fn set(&self, to: Duration) {
        self.nanos.store(duration_to_nanos(to), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();

        assert!(t2 > t1);
    }

    #[test]
    fn test_system_clock_is_past_epoch() {
        assert!(SystemClock.now() > Duration::from_secs(1_600_000_000));
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.clone();

        assert_eq!(clock.now(), Duration::ZERO);

        handle.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(1500));

        handle.set(Duration::from_secs(10));
        assert_eq!(clock.now(), Duration::from_secs(10));
    }

    #[test]
    fn test_clock_usable_as_trait_object() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert_eq!(clock.now(), Duration::ZERO);
    }
}
