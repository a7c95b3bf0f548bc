//! Per-session state guarded by the instance lock

use core::net::IpAddr;

use embassy_time::{Duration, Instant};
use sysnet_hal::{SocketFlags, SocketInfo};

use crate::config::SessionConfig;
use crate::event::EventHandler;
use crate::status::SessionStatus;
use crate::timer::Deadline;

/// Address a client connects to, with the bookkeeping that decides whether
/// a reconnect may skip DNS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedAddress {
    pub(crate) addr: IpAddr,
    pub(crate) resolved_at: Instant,
    /// Host name was a literal address; never expires
    pub(crate) literal: bool,
    /// An attempt with this address failed or the link dropped under it
    pub(crate) stale: bool,
}

impl ResolvedAddress {
    pub(crate) fn literal(addr: IpAddr, now: Instant) -> Self {
        Self {
            addr,
            resolved_at: now,
            literal: true,
            stale: false,
        }
    }

    pub(crate) fn resolved(addr: IpAddr, now: Instant) -> Self {
        Self {
            addr,
            resolved_at: now,
            literal: false,
            stale: false,
        }
    }

    pub(crate) fn is_fresh(&self, now: Instant, lifetime: Duration) -> bool {
        if self.stale {
            return false;
        }
        self.literal
            || now
                .checked_duration_since(self.resolved_at)
                .is_some_and(|age| age < lifetime)
    }
}

pub(crate) struct Instance<'a, Sock> {
    pub(crate) status: SessionStatus,
    pub(crate) config: SessionConfig,
    pub(crate) flags: SocketFlags,
    pub(crate) socket: Option<Sock>,
    pub(crate) address: Option<ResolvedAddress>,
    pub(crate) info: Option<SocketInfo>,
    /// The current connection completed a TLS handshake
    pub(crate) secured: bool,
    /// The last connection ended with the peer's FIN rather than an error
    pub(crate) peer_finished: bool,
    pub(crate) handler: Option<&'a dyn EventHandler>,
    /// TLS handshake timer
    pub(crate) deadline: Deadline,
}

impl<'a, Sock> Instance<'a, Sock> {
    /// Contents of an unallocated slot
    pub(crate) fn vacant() -> Self {
        Self {
            status: SessionStatus::Idle,
            config: SessionConfig::default(),
            flags: SocketFlags::empty(),
            socket: None,
            address: None,
            info: None,
            secured: false,
            peer_finished: false,
            handler: None,
            deadline: Deadline::disarmed(),
        }
    }

    pub(crate) fn new(config: SessionConfig, handler: Option<&'a dyn EventHandler>) -> Self {
        Self {
            status: SessionStatus::LowerLayerDown,
            flags: config.socket_flags(),
            config,
            handler,
            ..Self::vacant()
        }
    }

    /// Replace the configuration, dropping a cached address that no longer
    /// belongs to the host
    pub(crate) fn apply_config(&mut self, config: SessionConfig) {
        if config.host_name != self.config.host_name || config.mode != self.config.mode {
            self.address = None;
        }
        self.flags = config.socket_flags();
        self.config = config;
    }

    pub(crate) fn mark_address_stale(&mut self) {
        if let Some(address) = self.address.as_mut() {
            address.stale = true;
        }
    }
}
