//! Time sources
//!
//! Wall-clock milliseconds feed the encoder; a monotonic nanosecond counter
//! drives rate windows and idle cooldowns.

use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque time capability. Both reads must be cheap and non-blocking.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;

    /// Monotonic nanoseconds from an arbitrary origin
    fn now_nanos(&self) -> u64;
}

/// System wall clock plus a TSC-backed monotonic clock (no syscall per read)
pub struct SystemClock {
    mono: quanta::Clock,
    origin: quanta::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let mono = quanta::Clock::new();
        let origin = mono.now();
        Self { mono, origin }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    #[inline]
    fn now_nanos(&self) -> u64 {
        self.mono.now().duration_since(self.origin).as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_nanos_is_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now_nanos();
        let t2 = clock.now_nanos();
        assert!(t2 >= t1, "monotonic clock went backwards");
    }

    #[test]
    fn test_now_millis_is_recent() {
        let clock = SystemClock::new();
        // 2020-01-01T00:00:00Z
        assert!(clock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_now_nanos_advances_across_sleep() {
        let clock = SystemClock::new();
        let t1 = clock.now_nanos();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let t2 = clock.now_nanos();
        assert!(t2 - t1 >= 1_000_000);
    }
}
