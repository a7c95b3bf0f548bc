//! Monotonic tick source

use embassy_time::Instant;

/// Monotonic non-decreasing clock used for deadlines
///
/// Firmware returns `Instant::now()`; host tests return a value they
/// advance by hand.
pub trait Clock {
    fn now(&self) -> Instant;
}
