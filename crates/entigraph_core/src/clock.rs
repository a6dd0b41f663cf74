//! Time source shared by the database and its entities.

use parking_lot::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock with an optional pinned time.
///
/// By default the clock follows the wall clock. Hosts that need
/// deterministic timestamps (tests, replicated environments with a
/// consensus time) pin it with [`Clock::set_time`].
#[derive(Debug, Default)]
pub struct Clock {
    fixed_ms: RwLock<Option<u64>>,
}

impl Clock {
    /// Creates a clock that follows the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock pinned at `ms`.
    #[must_use]
    pub fn fixed(ms: u64) -> Self {
        Self {
            fixed_ms: RwLock::new(Some(ms)),
        }
    }

    /// Returns the current time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        if let Some(ms) = *self.fixed_ms.read() {
            return ms;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Pins the clock at `ms`.
    pub fn set_time(&self, ms: u64) {
        *self.fixed_ms.write() = Some(ms);
    }

    /// Moves the clock forward by `ms`, pinning it if it was following the
    /// wall clock.
    pub fn advance(&self, ms: u64) {
        let next = self.now_ms().saturating_add(ms);
        self.set_time(next);
    }

    /// Releases a pinned time and returns to the wall clock.
    pub fn clear_time(&self) {
        *self.fixed_ms.write() = None;
    }

    /// Returns whether the clock is pinned.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.fixed_ms.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_nonzero() {
        let clock = Clock::new();
        assert!(clock.now_ms() > 0);
        assert!(!clock.is_fixed());
    }

    #[test]
    fn fixed_and_advance() {
        let clock = Clock::fixed(1_000_000);
        assert_eq!(clock.now_ms(), 1_000_000);

        clock.advance(60_000);
        assert_eq!(clock.now_ms(), 1_060_000);
    }

    #[test]
    fn clear_returns_to_wall_clock() {
        let clock = Clock::fixed(5);
        clock.clear_time();
        assert!(!clock.is_fixed());
        assert!(clock.now_ms() > 5);
    }
}
