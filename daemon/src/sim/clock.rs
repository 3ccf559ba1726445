//! Manually advanced clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::hal::Clock;

/// Clock that only moves when slept on or advanced
///
/// Every busy-wait in the control core sleeps a tick, so simulated time
/// always makes progress.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_advances_shared_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.sleep_ms(250);
        other.advance(50);
        assert_eq!(clock.now_ms(), 300);
        assert_eq!(other.elapsed_since(100), 200);
    }
}
