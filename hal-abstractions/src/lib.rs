//! Hardware abstraction traits for the network session service
//!
//! This crate defines the traits the session core polls to drive a
//! connection: link readiness, DNS, presentation sockets, wall-clock time
//! and a monotonic tick clock. BSPs implement these traits over their
//! TCP/IP stack (see `boards/feather-stm32f405` for an embassy-net one).
//!
//! Every method is a poll: it must return in bounded time and report
//! "not yet" instead of waiting.

#![no_std]
#![deny(unsafe_code)]

pub mod clock;
pub mod dns;
pub mod link;
pub mod socket;
pub mod time;

pub use clock::Clock;
pub use dns::{DnsError, QueryStatus, Resolver};
pub use link::LinkMonitor;
pub use socket::{OpenRequest, PresentationSockets, SocketError, SocketFlags, SocketInfo, SocketState};
pub use time::TimeSource;

/// Everything the session core needs from the platform
///
/// Blanket-implemented for any type providing all collaborator traits, so
/// a BSP only implements the individual traits.
pub trait NetStack: LinkMonitor + Resolver + PresentationSockets + TimeSource + Clock {}

impl<T> NetStack for T where T: LinkMonitor + Resolver + PresentationSockets + TimeSource + Clock {}
