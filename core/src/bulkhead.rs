//! Bulkhead for concurrency limiting
//!
//! Caps how many calls may run through one breaker at once, independent of
//! breaker state. A full bulkhead short-circuits the call without touching
//! the breaker's counters.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A semaphore-based bulkhead for limiting concurrent operations
#[derive(Debug)]
pub struct BulkheadSemaphore {
    limit: usize,
    acquired: AtomicUsize,
}

impl BulkheadSemaphore {
    /// Create a bulkhead admitting at most `limit` concurrent calls
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            limit: limit.get(),
            acquired: AtomicUsize::new(0),
        }
    }

    /// Try to acquire a permit without blocking
    ///
    /// Returns `None` if the bulkhead is at capacity.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BulkheadGuard> {
        let mut current = self.acquired.load(Ordering::Acquire);

        loop {
            if current >= self.limit {
                return None;
            }

            match self.acquired.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(BulkheadGuard {
                        semaphore: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.acquired())
    }

    fn release(&self) {
        self.acquired.fetch_sub(1, Ordering::Release);
    }
}

/// Guard that releases a bulkhead permit when dropped, even on panic
#[derive(Debug)]
pub struct BulkheadGuard {
    semaphore: Arc<BulkheadSemaphore>,
}

impl Drop for BulkheadGuard {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn bulkhead(limit: usize) -> Arc<BulkheadSemaphore> {
        Arc::new(BulkheadSemaphore::new(NonZeroUsize::new(limit).unwrap()))
    }

    #[test]
    fn test_bulkhead_acquire_release() {
        let bulkhead = bulkhead(2);

        let guard1 = bulkhead.try_acquire().expect("Should acquire");
        let guard2 = bulkhead.try_acquire().expect("Should acquire");
        assert_eq!(bulkhead.available(), 0);
        assert!(bulkhead.try_acquire().is_none(), "At capacity");

        drop(guard1);
        assert_eq!(bulkhead.acquired(), 1);
        assert!(bulkhead.try_acquire().is_some());

        drop(guard2);
        assert_eq!(bulkhead.acquired(), 0);
    }

    #[test]
    fn test_bulkhead_exact_under_contention() {
        let bulkhead = bulkhead(5);
        let attempted = Arc::new(Barrier::new(10));
        let mut handles = vec![];

        for _ in 0..10 {
            let bulkhead = Arc::clone(&bulkhead);
            let attempted = Arc::clone(&attempted);
            handles.push(thread::spawn(move || {
                let guard = bulkhead.try_acquire();
                // Hold permits until every thread has tried
                attempted.wait();
                guard.is_some()
            }));
        }

        let acquired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(acquired, 5);
        assert_eq!(bulkhead.acquired(), 0);
    }

    #[test]
    fn test_bulkhead_guard_releases_on_panic() {
        let bulkhead = bulkhead(2);

        let bulkhead_clone = Arc::clone(&bulkhead);
        let result = std::panic::catch_unwind(move || {
            let _guard = bulkhead_clone.try_acquire().unwrap();
            panic!("Simulated panic");
        });

        assert!(result.is_err());
        assert_eq!(bulkhead.acquired(), 0);
    }
}
