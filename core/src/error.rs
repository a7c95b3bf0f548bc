//! Error codes returned by the session operations

/// Session operation errors
///
/// Only caller-facing conditions appear here. Link loss, DNS and TLS
/// failures are handled by the state machine and reported as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Generic failure (e.g. stack-level read/write error)
    Failure,
    /// Session is not connected or the link is down
    ServiceDown,
    /// Not enough transmit buffer space; try again later
    TransmitNotReady,
    /// No data available to read
    ReceiveNotReady,
    /// The instance lock is held by someone else
    LockOperationFailed,
    /// Handle is unknown, stale or closed
    InvalidHandle,
    /// No free slot in the pool
    Exhausted,
    /// Configuration rejected (e.g. host name too long)
    InvalidConfig,
}

impl Error {
    /// Numeric result code of the C-style API
    pub fn code(self) -> i32 {
        match self {
            Self::Failure | Self::Exhausted | Self::InvalidConfig => -1,
            Self::ServiceDown => -2,
            Self::TransmitNotReady => -3,
            Self::ReceiveNotReady => -4,
            Self::LockOperationFailed => -5,
            Self::InvalidHandle => -6,
        }
    }

    /// Transient conditions the caller should simply retry
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TransmitNotReady | Self::ReceiveNotReady | Self::LockOperationFailed
        )
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Failure => write!(f, "Failure"),
            Self::ServiceDown => write!(f, "Service down"),
            Self::TransmitNotReady => write!(f, "Transmit buffer not ready"),
            Self::ReceiveNotReady => write!(f, "No data to receive"),
            Self::LockOperationFailed => write!(f, "Instance lock busy"),
            Self::InvalidHandle => write!(f, "Invalid handle"),
            Self::Exhausted => write!(f, "No free session slot"),
            Self::InvalidConfig => write!(f, "Invalid configuration"),
        }
    }
}

impl core::error::Error for Error {}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::ServiceDown => embedded_io::ErrorKind::NotConnected,
            Self::InvalidHandle | Self::InvalidConfig => embedded_io::ErrorKind::InvalidInput,
            Self::Exhausted => embedded_io::ErrorKind::OutOfMemory,
            Self::Failure
            | Self::TransmitNotReady
            | Self::ReceiveNotReady
            | Self::LockOperationFailed => embedded_io::ErrorKind::Other,
        }
    }
}
