//! Bounded waiting on a serial line
//!
//! The handshake's only blocking primitive: poll `available()` against a deadline,
//! sleeping a fixed interval between polls. Time comes from the injected [`Clock`], so a
//! simulated clock turns a one-second timeout into a deterministic loop.

use crate::io::{Clock, Serial};
use std::io;
use tracing::trace;

/// Timeout and poll granularity for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Give up once this much time has elapsed
    pub timeout_ms: u64,
    /// Sleep between availability checks
    pub interval_ms: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: crate::DEFAULT_HANDSHAKE_TIMEOUT_MS,
            interval_ms: crate::DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl PollPolicy {
    pub fn new(timeout_ms: u64, interval_ms: u32) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }

    /// Wait until `count` bytes are available or the timeout elapses
    ///
    /// Returns `Ok(true)` when the bytes arrived in time. Nothing is consumed either way;
    /// a partial arrival stays queued on the port.
    pub fn wait_for<S, C>(&self, port: &mut S, clock: &mut C, count: usize) -> io::Result<bool>
    where
        S: Serial + ?Sized,
        C: Clock + ?Sized,
    {
        let deadline = clock.now_ms().saturating_add(self.timeout_ms);

        loop {
            if port.available()? >= count {
                return Ok(true);
            }
            if clock.now_ms() >= deadline {
                trace!(count, timeout_ms = self.timeout_ms, "wait timed out");
                return Ok(false);
            }
            clock.sleep_ms(self.interval_ms.max(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ManualClock, MemorySerial};

    #[test]
    fn test_ready_bytes_return_immediately() {
        let mut port = MemorySerial::with_input(b"C");
        let mut clock = ManualClock::new();
        assert!(PollPolicy::default().wait_for(&mut port, &mut clock, 1).unwrap());
        assert_eq!(clock.slept_ms(), 0);
        assert_eq!(port.available().unwrap(), 1);
    }

    #[test]
    fn test_partial_arrival_times_out() {
        let mut port = MemorySerial::with_input(&[1, 2, 3]);
        let mut clock = ManualClock::new();
        let policy = PollPolicy::new(1000, 1);
        assert!(!policy.wait_for(&mut port, &mut clock, 8).unwrap());
        assert_eq!(clock.now_ms(), 1000);
        assert_eq!(port.available().unwrap(), 3);
    }

    #[test]
    fn test_zero_interval_still_progresses() {
        let mut port = MemorySerial::new();
        let mut clock = ManualClock::new();
        assert!(!PollPolicy::new(5, 0).wait_for(&mut port, &mut clock, 1).unwrap());
        assert_eq!(clock.now_ms(), 5);
    }
}
