//! Asynchronous DNS query primitives
//!
//! Queries are started once and then polled on every scheduler tick until
//! they settle. Literal IP addresses never reach the resolver; the session
//! core short-circuits them.

use core::net::IpAddr;

/// DNS resolver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DnsError {
    /// No free query slot; try again later
    Busy,
    /// Host name is empty or malformed
    InvalidName,
    /// No DNS server configured on the interface
    NoServer,
    /// Server answered but had no A/AAAA record
    NoRecord,
    /// Query was never started for this name
    NotStarted,
}

impl core::fmt::Display for DnsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "DNS resolver busy"),
            Self::InvalidName => write!(f, "Invalid host name"),
            Self::NoServer => write!(f, "No DNS server"),
            Self::NoRecord => write!(f, "No address record"),
            Self::NotStarted => write!(f, "Query not started"),
        }
    }
}

impl core::error::Error for DnsError {}

/// Outcome of polling a started query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Name resolved
    Resolved(IpAddr),
    /// Still waiting for the server
    Pending,
    /// Server did not answer in time; the query may be restarted
    ServerTimeout,
    /// Query failed for good
    Failed(DnsError),
}

/// Non-blocking DNS resolver
pub trait Resolver {
    /// Start (or restart) a query for `host`
    fn start_query(&self, host: &str) -> Result<(), DnsError>;

    /// Poll the query previously started for `host`
    fn poll_query(&self, host: &str) -> QueryStatus;
}
