#![deny(unsafe_code)]
//! Network module for the W5500 Ethernet, DNS, SNTP and session sockets
//!
//! The embassy-net stack and its async sockets live in the network task.
//! [`BoardStack`] is the polled face of that task which the session service
//! drives.

pub mod config;
pub mod dns;
pub mod error;
pub mod link;
pub mod sntp;
pub mod socket;
pub mod tls;

use embassy_time::Instant;
use sysnet_hal::{
    Clock, DnsError, LinkMonitor, OpenRequest, PresentationSockets, QueryStatus, Resolver,
    SocketError, SocketInfo, SocketState, TimeSource,
};

use self::dns::DnsBridge;
use self::link::LinkState;
use self::sntp::SntpClock;
use self::socket::{SocketSlot, SOCKET_SLOTS};

pub static LINK: LinkState = LinkState::new();
pub static DNS: DnsBridge = DnsBridge::new();
pub static SOCKETS: [SocketSlot; SOCKET_SLOTS] = [SocketSlot::new(), SocketSlot::new()];
pub static CLOCK: SntpClock = SntpClock::new();

/// The W5500 is the board's only interface
const INTERFACE: u8 = 0;

/// Session-service view of the board's network task
pub struct BoardStack {
    link: &'static LinkState,
    dns: &'static DnsBridge,
    sockets: &'static [SocketSlot; SOCKET_SLOTS],
    clock: &'static SntpClock,
}

impl BoardStack {
    pub fn new() -> Self {
        Self {
            link: &LINK,
            dns: &DNS,
            sockets: &SOCKETS,
            clock: &CLOCK,
        }
    }

    fn slot(&self, socket: u8) -> Option<&SocketSlot> {
        self.sockets.get(usize::from(socket))
    }
}

impl LinkMonitor for BoardStack {
    fn link_up(&self, interface: u8) -> bool {
        interface == INTERFACE && self.link.link_up()
    }

    fn ip_ready(&self, interface: u8) -> bool {
        interface == INTERFACE && self.link.ip_ready()
    }
}

impl Resolver for BoardStack {
    fn start_query(&self, host: &str) -> Result<(), DnsError> {
        self.dns.start_query(host)
    }

    fn poll_query(&self, host: &str) -> QueryStatus {
        self.dns.poll_query(host)
    }
}

impl PresentationSockets for BoardStack {
    type Socket = u8;

    fn open(&self, request: &OpenRequest) -> Result<u8, SocketError> {
        if request.interface != INTERFACE || request.remote.is_some_and(|addr| addr.is_ipv6()) {
            return Err(SocketError::Unaddressable);
        }
        self.sockets
            .iter()
            .position(|slot| slot.open(*request))
            .map(|index| index as u8)
            .ok_or(SocketError::NoSocket)
    }

    fn close(&self, socket: u8) {
        if let Some(slot) = self.slot(socket) {
            slot.close();
        }
    }

    fn state(&self, socket: u8) -> SocketState {
        self.slot(socket)
            .map_or(SocketState::Closed, SocketSlot::state)
    }

    fn read_ready(&self, socket: u8) -> usize {
        self.slot(socket).map_or(0, SocketSlot::readable)
    }

    fn write_ready(&self, socket: u8, required: usize) -> usize {
        self.slot(socket).map_or(0, |slot| slot.writable(required))
    }

    fn read(&self, socket: u8, buf: &mut [u8]) -> Result<usize, SocketError> {
        let slot = self.slot(socket).ok_or(SocketError::InvalidSocket)?;
        Ok(slot.read(buf))
    }

    fn write(&self, socket: u8, data: &[u8]) -> Result<usize, SocketError> {
        let slot = self.slot(socket).ok_or(SocketError::InvalidSocket)?;
        if slot.state() != SocketState::Connected && slot.state() != SocketState::PeerClosed {
            return Err(SocketError::NotConnected);
        }
        slot.write(data).ok_or(SocketError::BufferFull)
    }

    fn flush(&self, socket: u8) -> Result<(), SocketError> {
        // the bridge drains the transmit pipe on its own
        self.slot(socket)
            .map(|_| ())
            .ok_or(SocketError::InvalidSocket)
    }

    fn info(&self, socket: u8) -> Option<SocketInfo> {
        self.slot(socket).and_then(SocketSlot::info)
    }

    fn start_encryption(&self, socket: u8) -> Result<(), SocketError> {
        let slot = self.slot(socket).ok_or(SocketError::InvalidSocket)?;
        if slot.state() != SocketState::Connected {
            return Err(SocketError::NotConnected);
        }
        slot.start_tls();
        Ok(())
    }

    fn is_negotiating(&self, socket: u8) -> bool {
        self.slot(socket).is_some_and(SocketSlot::is_negotiating)
    }

    fn is_secure(&self, socket: u8) -> bool {
        self.slot(socket).is_some_and(SocketSlot::is_secure)
    }
}

impl TimeSource for BoardStack {
    fn unix_seconds(&self) -> Option<u64> {
        self.clock.unix_seconds()
    }
}

impl Clock for BoardStack {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
