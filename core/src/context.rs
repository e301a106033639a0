//! Caller execution context: deadline and cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline and cancellation flag handed to protected work
///
/// The breaker never interrupts running work. Work is expected to check
/// [`CallContext::is_done`] (or pass [`CallContext::remaining`] on as an I/O
/// timeout) and give up on its own. Clones share the cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    /// Context with no deadline that is never cancelled unless asked to be
    pub fn background() -> Self {
        Self::default()
    }

    /// Context expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline (`None` when there is no deadline)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_done() {
        let ctx = CallContext::background();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_with_clones() {
        let ctx = CallContext::background();
        let clone = ctx.clone();

        clone.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.is_done());
    }

    #[test]
    fn test_deadline_expires() {
        let ctx = CallContext::with_timeout(Duration::from_millis(200));
        assert!(!ctx.is_expired());

        std::thread::sleep(Duration::from_millis(250));
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
