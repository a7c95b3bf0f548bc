//! Network session service for embedded devices
//!
//! Manages a small pool of client and server sessions on top of a
//! non-blocking TCP/IP stack. Each session runs its own connection state
//! machine (address resolution, socket connect, optional TLS upgrade,
//! reconnect after failures) advanced by periodic calls to
//! [`NetService::poll`], and reports progress through [`Event`]s.
//!
//! The stack is reached only through the traits of `sysnet-hal`, so the
//! crate has no hardware dependencies and its tests run on the host.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// must come first so the logging macros are visible to all other modules
mod fmt;

pub mod config;
pub mod error;
pub mod event;
mod fsm;
mod instance;
pub mod link;
pub mod pipe;
pub mod pool;
pub mod service;
pub mod status;
pub mod timer;

pub use config::{ConfigParam, HostName, IpProtocol, Mode, ServiceConfig, SessionConfig};
pub use error::Error;
pub use event::{Event, EventHandler};
pub use pipe::SessionPipe;
pub use pool::Handle;
pub use service::{Control, NetService, SessionInfo, DEFAULT_CAPACITY};
pub use status::SessionStatus;
