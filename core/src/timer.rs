//! Deadline tracking relative to the stack's tick clock

use embassy_time::{Duration, Instant};

/// One-shot countdown, armed from a clock reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    /// A deadline that is not running
    pub const fn disarmed() -> Self {
        Self {
            started: None,
            timeout: Duration::from_ticks(0),
        }
    }

    pub fn arm(&mut self, now: Instant, timeout: Duration) {
        self.started = Some(now);
        self.timeout = timeout;
    }

    pub fn reset(&mut self) {
        self.started = None;
    }

    pub fn is_armed(&self) -> bool {
        self.started.is_some()
    }

    /// `true` once more than `timeout` has elapsed since arming
    ///
    /// A disarmed deadline never expires.
    pub fn expired(&self, now: Instant) -> bool {
        match self.started {
            Some(start) => now
                .checked_duration_since(start)
                .is_some_and(|elapsed| elapsed > self.timeout),
            None => false,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::disarmed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarmed_never_expires() {
        let deadline = Deadline::disarmed();
        assert!(!deadline.is_armed());
        assert!(!deadline.expired(Instant::from_secs(1_000_000)));
    }

    #[test]
    fn test_expiry() {
        let mut deadline = Deadline::disarmed();
        deadline.arm(Instant::from_secs(100), Duration::from_secs(10));
        assert!(deadline.is_armed());
        assert!(!deadline.expired(Instant::from_secs(105)));
        assert!(!deadline.expired(Instant::from_secs(110)));
        assert!(deadline.expired(Instant::from_secs(111)));
    }

    #[test]
    fn test_clock_behind_start_is_not_expired() {
        let mut deadline = Deadline::disarmed();
        deadline.arm(Instant::from_secs(100), Duration::from_secs(1));
        assert!(!deadline.expired(Instant::from_secs(50)));
    }

    #[test]
    fn test_reset() {
        let mut deadline = Deadline::disarmed();
        deadline.arm(Instant::from_secs(0), Duration::from_secs(1));
        deadline.reset();
        assert!(!deadline.expired(Instant::from_secs(60)));
    }
}
