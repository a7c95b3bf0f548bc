//! Scriptable in-memory network stack for driving sessions in tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard};

use embassy_time::{Duration, Instant};
use sysnet_core::{Event, Handle};
use sysnet_hal::{
    Clock, DnsError, LinkMonitor, OpenRequest, PresentationSockets, QueryStatus, Resolver,
    SocketError, SocketInfo, SocketState, TimeSource,
};

pub type SocketId = u32;

#[derive(Debug)]
pub struct SimSocket {
    pub request: OpenRequest,
    pub state: SocketState,
    pub open: bool,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    /// Free transmit space
    pub tx_space: usize,
    pub negotiating: bool,
    pub secure: bool,
    pub remote: Option<SocketAddr>,
}

#[derive(Debug)]
pub struct SimState {
    pub link_up: bool,
    pub ip_ready: bool,
    pub now: Instant,
    pub unix_time: Option<u64>,
    /// Answer returned when a started query is polled
    pub dns_answers: HashMap<String, QueryStatus>,
    pub dns_start_error: Option<DnsError>,
    pub started_queries: Vec<String>,
    pub open_error: Option<SocketError>,
    /// Result of the handshake once `start_encryption` is called
    pub tls_outcome: TlsOutcome,
    pub encryption_error: Option<SocketError>,
    pub sockets: HashMap<SocketId, SimSocket>,
    pub opened: Vec<SocketId>,
    next_id: SocketId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsOutcome {
    /// Handshake finishes immediately
    Secure,
    /// Handshake never finishes
    Hang,
    /// Handshake finishes without a secure channel
    Reject,
}

pub struct SimStack {
    state: Mutex<SimState>,
}

impl Default for SimStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SimStack {
    /// Link up and configured, clock at 1000 s, time not synced
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                link_up: true,
                ip_ready: true,
                now: Instant::from_secs(1000),
                unix_time: None,
                dns_answers: HashMap::new(),
                dns_start_error: None,
                started_queries: Vec::new(),
                open_error: None,
                tls_outcome: TlsOutcome::Secure,
                encryption_error: None,
                sockets: HashMap::new(),
                opened: Vec::new(),
                next_id: 1,
            }),
        }
    }

    pub fn sim(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn set_link(&self, up: bool) {
        self.sim().link_up = up;
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.sim();
        state.now += by;
    }

    pub fn sync_time(&self) {
        self.sim().unix_time = Some(1_700_000_000);
    }

    pub fn answer(&self, host: &str, status: QueryStatus) {
        self.sim().dns_answers.insert(host.to_string(), status);
    }

    /// Most recently opened socket
    pub fn last_socket(&self) -> SocketId {
        *self.sim().opened.last().expect("no socket opened")
    }

    pub fn sockets_opened(&self) -> usize {
        self.sim().opened.len()
    }

    pub fn with_socket<R>(&self, id: SocketId, f: impl FnOnce(&mut SimSocket) -> R) -> R {
        let mut state = self.sim();
        f(state.sockets.get_mut(&id).expect("unknown socket"))
    }

    /// Complete the connection of socket `id`
    pub fn connect(&self, id: SocketId, remote: Option<SocketAddr>) {
        self.with_socket(id, |socket| {
            socket.state = SocketState::Connected;
            if remote.is_some() {
                socket.remote = remote;
            }
        });
    }

    pub fn push_rx(&self, id: SocketId, data: &[u8]) {
        self.with_socket(id, |socket| socket.rx.extend(data.iter().copied()));
    }

    pub fn peer_close(&self, id: SocketId) {
        self.with_socket(id, |socket| socket.state = SocketState::PeerClosed);
    }

    pub fn reset(&self, id: SocketId) {
        self.with_socket(id, |socket| socket.state = SocketState::Closed);
    }

    pub fn tx(&self, id: SocketId) -> Vec<u8> {
        self.with_socket(id, |socket| socket.tx.clone())
    }

    pub fn is_open(&self, id: SocketId) -> bool {
        self.with_socket(id, |socket| socket.open)
    }
}

impl LinkMonitor for SimStack {
    fn link_up(&self, _interface: u8) -> bool {
        self.sim().link_up
    }

    fn ip_ready(&self, _interface: u8) -> bool {
        let state = self.sim();
        state.link_up && state.ip_ready
    }
}

impl Clock for SimStack {
    fn now(&self) -> Instant {
        self.sim().now
    }
}

impl TimeSource for SimStack {
    fn unix_seconds(&self) -> Option<u64> {
        self.sim().unix_time
    }
}

impl Resolver for SimStack {
    fn start_query(&self, host: &str) -> Result<(), DnsError> {
        let mut state = self.sim();
        if let Some(err) = state.dns_start_error {
            return Err(err);
        }
        state.started_queries.push(host.to_string());
        Ok(())
    }

    fn poll_query(&self, host: &str) -> QueryStatus {
        self.sim()
            .dns_answers
            .get(host)
            .copied()
            .unwrap_or(QueryStatus::Pending)
    }
}

impl PresentationSockets for SimStack {
    type Socket = SocketId;

    fn open(&self, request: &OpenRequest) -> Result<SocketId, SocketError> {
        let mut state = self.sim();
        if let Some(err) = state.open_error {
            return Err(err);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.sockets.insert(
            id,
            SimSocket {
                request: *request,
                state: SocketState::Connecting,
                open: true,
                rx: VecDeque::new(),
                tx: Vec::new(),
                tx_space: 1024,
                negotiating: false,
                secure: false,
                remote: request
                    .remote
                    .map(|addr| SocketAddr::new(addr, request.port)),
            },
        );
        state.opened.push(id);
        Ok(id)
    }

    fn close(&self, socket: SocketId) {
        if let Some(socket) = self.sim().sockets.get_mut(&socket) {
            socket.open = false;
            socket.state = SocketState::Closed;
        }
    }

    fn state(&self, socket: SocketId) -> SocketState {
        self.sim()
            .sockets
            .get(&socket)
            .map_or(SocketState::Closed, |socket| socket.state)
    }

    fn read_ready(&self, socket: SocketId) -> usize {
        self.sim()
            .sockets
            .get(&socket)
            .map_or(0, |socket| socket.rx.len())
    }

    fn write_ready(&self, socket: SocketId, required: usize) -> usize {
        let state = self.sim();
        match state.sockets.get(&socket) {
            Some(socket) if socket.tx_space >= required => socket.tx_space,
            _ => 0,
        }
    }

    fn read(&self, socket: SocketId, buf: &mut [u8]) -> Result<usize, SocketError> {
        let mut state = self.sim();
        let socket = state
            .sockets
            .get_mut(&socket)
            .ok_or(SocketError::InvalidSocket)?;
        let len = buf.len().min(socket.rx.len());
        for (slot, byte) in buf.iter_mut().zip(socket.rx.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }

    fn write(&self, socket: SocketId, data: &[u8]) -> Result<usize, SocketError> {
        let mut state = self.sim();
        let socket = state
            .sockets
            .get_mut(&socket)
            .ok_or(SocketError::InvalidSocket)?;
        let len = data.len().min(socket.tx_space);
        socket.tx.extend_from_slice(&data[..len]);
        Ok(len)
    }

    fn flush(&self, _socket: SocketId) -> Result<(), SocketError> {
        Ok(())
    }

    fn info(&self, socket: SocketId) -> Option<SocketInfo> {
        let state = self.sim();
        let socket = state.sockets.get(&socket)?;
        Some(SocketInfo {
            local_port: if socket.request.remote.is_none() {
                socket.request.port
            } else {
                49152
            },
            remote: socket.remote,
            interface: socket.request.interface,
        })
    }

    fn start_encryption(&self, socket: SocketId) -> Result<(), SocketError> {
        let mut state = self.sim();
        if let Some(err) = state.encryption_error {
            return Err(err);
        }
        let outcome = state.tls_outcome;
        let socket = state
            .sockets
            .get_mut(&socket)
            .ok_or(SocketError::InvalidSocket)?;
        match outcome {
            TlsOutcome::Secure => socket.secure = true,
            TlsOutcome::Hang => socket.negotiating = true,
            TlsOutcome::Reject => {}
        }
        Ok(())
    }

    fn is_negotiating(&self, socket: SocketId) -> bool {
        self.sim()
            .sockets
            .get(&socket)
            .is_some_and(|socket| socket.negotiating)
    }

    fn is_secure(&self, socket: SocketId) -> bool {
        self.sim()
            .sockets
            .get(&socket)
            .is_some_and(|socket| socket.secure)
    }
}

/// Event handler that records what it receives
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(Handle, Event)>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| *event)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl sysnet_core::EventHandler for Recorder {
    fn on_event(&self, handle: Handle, event: Event) {
        self.events.lock().unwrap().push((handle, event));
    }
}

pub fn addr(text: &str) -> IpAddr {
    text.parse().unwrap()
}
