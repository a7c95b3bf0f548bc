//! Wall-clock time source (SNTP or RTC backed)

/// Source of synchronized UTC time
///
/// TLS certificate validation needs real time, so sessions with TLS wait
/// until this reports a value.
pub trait TimeSource {
    /// Seconds since the Unix epoch, or `None` until the first sync
    fn unix_seconds(&self) -> Option<u64>;

    /// Convenience check used by the session core
    fn is_synced(&self) -> bool {
        self.unix_seconds().is_some()
    }
}
