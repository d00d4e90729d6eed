//! Millisecond clocks used for entry expiry and eviction ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time in Unix milliseconds.
///
/// The manager reads the clock once per operation and hands the value to the
/// backends, so a test clock fully controls expiry.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now_ms(), 1_250);

        other.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn test_system_clock_is_past_epoch() {
        assert!(SystemClock.now_ms() > 1_600_000_000_000);
    }
}
