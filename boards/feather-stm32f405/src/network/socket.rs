#![deny(unsafe_code)]
//! Socket bridges between the polled session service and embassy-net
//!
//! embassy-net sockets are async and borrow their buffers, so each one
//! lives inside a bridge task. The service side only touches a
//! [`SocketSlot`]: it signals commands, watches the state atomics and moves
//! payload through the two pipes.

use core::cell::Cell;
use core::net::SocketAddr;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use defmt::{debug, info, warn, Debug2Format};
use embassy_futures::select::{select, select3, Either, Either3};
use embassy_net::tcp::TcpSocket;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};
use embedded_tls::{Aes128GcmSha256, TlsConnection};
use sysnet_hal::{OpenRequest, SocketInfo, SocketState};

use super::dns::{to_core_addr, to_stack_addr};
use super::error::NetworkError;
use super::tls::TlsEngine;
use crate::tls_buffers;

/// Socket bridges available to sessions
pub const SOCKET_SLOTS: usize = 2;

/// Bytes buffered per direction between service and bridge
const PIPE_SIZE: usize = 1024;

/// embassy-net socket buffer size per direction
const SOCKET_BUF_SIZE: usize = 2048;

/// Bytes moved per bridge iteration
const CHUNK: usize = 512;

const TCP_TIMEOUT: Duration = Duration::from_secs(30);

const UDP_PACKETS: usize = 4;

#[derive(Clone, Copy)]
enum Command {
    Open(OpenRequest),
    StartTls,
    Close,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum TlsPhase {
    Plain = 0,
    Negotiating = 1,
    Secure = 2,
    Failed = 3,
}

impl TlsPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Negotiating,
            2 => Self::Secure,
            3 => Self::Failed,
            _ => Self::Plain,
        }
    }
}

const fn state_to_u8(state: SocketState) -> u8 {
    match state {
        SocketState::Connecting => 0,
        SocketState::Connected => 1,
        SocketState::PeerClosed => 2,
        SocketState::Closed => 3,
    }
}

fn state_from_u8(value: u8) -> SocketState {
    match value {
        0 => SocketState::Connecting,
        1 => SocketState::Connected,
        2 => SocketState::PeerClosed,
        _ => SocketState::Closed,
    }
}

/// How a bridged connection ended
#[derive(Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// The owner asked for the close
    Closed,
    /// The network ended it; the owner still has to close
    Dropped,
}

/// Reason the data pump stopped
enum Stop {
    Exit(Exit),
    StartTls,
}

enum Activity<E> {
    Inbound(Result<usize, E>),
    Outbound(usize),
    Command(Command),
}

/// Shared half of one socket bridge
pub struct SocketSlot {
    claimed: AtomicBool,
    state: AtomicU8,
    tls: AtomicU8,
    info: Mutex<CriticalSectionRawMutex, Cell<Option<SocketInfo>>>,
    commands: Signal<CriticalSectionRawMutex, Command>,
    rx: Pipe<CriticalSectionRawMutex, PIPE_SIZE>,
    tx: Pipe<CriticalSectionRawMutex, PIPE_SIZE>,
}

impl SocketSlot {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            state: AtomicU8::new(state_to_u8(SocketState::Closed)),
            tls: AtomicU8::new(TlsPhase::Plain as u8),
            info: Mutex::new(Cell::new(None)),
            commands: Signal::new(),
            rx: Pipe::new(),
            tx: Pipe::new(),
        }
    }

    /// Claim an idle bridge and hand it the request
    ///
    /// Returns `false` if the bridge is still serving a previous socket.
    pub fn open(&self, request: OpenRequest) -> bool {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.info.lock(|info| info.set(None));
        self.tls.store(TlsPhase::Plain as u8, Ordering::Release);
        self.set_state(SocketState::Connecting);
        self.commands.signal(Command::Open(request));
        true
    }

    pub fn close(&self) {
        self.set_state(SocketState::Closed);
        self.commands.signal(Command::Close);
    }

    pub fn state(&self) -> SocketState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SocketState) {
        self.state.store(state_to_u8(state), Ordering::Release);
    }

    pub fn info(&self) -> Option<SocketInfo> {
        self.info.lock(|info| info.get())
    }

    pub fn readable(&self) -> usize {
        self.rx.len()
    }

    /// Free transmit space if `required` bytes fit, otherwise 0
    pub fn writable(&self, required: usize) -> usize {
        let free = self.tx.free_capacity();
        if free >= required {
            free
        } else {
            0
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.rx.try_read(buf).unwrap_or(0)
    }

    pub fn write(&self, data: &[u8]) -> Option<usize> {
        self.tx.try_write(data).ok()
    }

    pub fn start_tls(&self) {
        self.tls.store(TlsPhase::Negotiating as u8, Ordering::Release);
        self.commands.signal(Command::StartTls);
    }

    pub fn is_negotiating(&self) -> bool {
        TlsPhase::from_u8(self.tls.load(Ordering::Acquire)) == TlsPhase::Negotiating
    }

    pub fn is_secure(&self) -> bool {
        TlsPhase::from_u8(self.tls.load(Ordering::Acquire)) == TlsPhase::Secure
    }

    fn set_tls(&self, phase: TlsPhase) {
        self.tls.store(phase as u8, Ordering::Release);
    }

    fn publish_info(&self, local_port: u16, remote: Option<IpEndpoint>, interface: u8) {
        let remote = remote.and_then(|endpoint| {
            to_core_addr(endpoint.addr).map(|addr| SocketAddr::new(addr, endpoint.port))
        });
        self.info.lock(|info| {
            info.set(Some(SocketInfo {
                local_port,
                remote,
                interface,
            }))
        });
    }

    async fn close_requested(&self) {
        while !matches!(self.commands.wait().await, Command::Close) {}
    }

    /// Bridge task body; one per slot
    pub async fn run<R>(&self, stack: Stack<'static>, tls: &TlsEngine<R>) -> !
    where
        R: rand_core::RngCore + rand_core::CryptoRng,
    {
        loop {
            let Command::Open(request) = self.commands.wait().await else {
                continue;
            };
            self.rx.clear();
            self.tx.clear();

            let exit = if request.flags.is_stream() {
                self.run_tcp(stack, &request, tls).await
            } else {
                self.run_udp(stack, &request).await
            };

            self.set_state(SocketState::Closed);
            if exit == Exit::Dropped {
                self.close_requested().await;
            }
            debug!("Socket bridge released");
            self.claimed.store(false, Ordering::Release);
        }
    }

    async fn run_tcp<R>(
        &self,
        stack: Stack<'static>,
        request: &OpenRequest,
        tls: &TlsEngine<R>,
    ) -> Exit
    where
        R: rand_core::RngCore + rand_core::CryptoRng,
    {
        let mut rx_buffer = [0u8; SOCKET_BUF_SIZE];
        let mut tx_buffer = [0u8; SOCKET_BUF_SIZE];
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        socket.set_timeout(Some(TCP_TIMEOUT));

        let established = match request.remote {
            Some(remote) => {
                let Some(addr) = to_stack_addr(remote) else {
                    warn!("IPv6 remote not supported");
                    return Exit::Dropped;
                };
                let endpoint = IpEndpoint::new(addr, request.port);
                select(
                    async { socket.connect(endpoint).await.is_ok() },
                    self.close_requested(),
                )
                .await
            }
            None => {
                select(
                    async { socket.accept(request.port).await.is_ok() },
                    self.close_requested(),
                )
                .await
            }
        };

        match established {
            Either::Second(()) => {
                socket.abort();
                return Exit::Closed;
            }
            Either::First(false) => {
                warn!("TCP connect to port {} failed", request.port);
                return Exit::Dropped;
            }
            Either::First(true) => {}
        }

        let local_port = socket
            .local_endpoint()
            .map_or(request.port, |endpoint| endpoint.port);
        self.publish_info(local_port, socket.remote_endpoint(), request.interface);
        self.set_state(SocketState::Connected);
        info!("TCP connection established (port {})", request.port);

        let mut transport = AsyncTcpSocket::new(socket);
        match self.pump(&mut transport, true).await {
            Stop::Exit(exit) => {
                transport.close();
                exit
            }
            Stop::StartTls => self.secure(transport, tls).await,
        }
    }

    /// Upgrade an established connection and keep pumping over TLS
    async fn secure<R>(&self, mut transport: AsyncTcpSocket<'_>, tls: &TlsEngine<R>) -> Exit
    where
        R: rand_core::RngCore + rand_core::CryptoRng,
    {
        let Some(mut buffers) = tls_buffers::claim() else {
            warn!("{}", NetworkError::TlsBusy);
            self.set_tls(TlsPhase::Failed);
            transport.close();
            return Exit::Dropped;
        };
        let (read_buf, write_buf) = buffers.split();
        let mut connection =
            TlsConnection::<_, Aes128GcmSha256>::new(transport, read_buf, write_buf);

        if tls.handshake(&mut connection).await.is_err() {
            self.set_tls(TlsPhase::Failed);
            return Exit::Dropped;
        }
        self.set_tls(TlsPhase::Secure);

        let exit = match self.pump(&mut connection, false).await {
            Stop::Exit(exit) => exit,
            Stop::StartTls => Exit::Dropped,
        };
        match connection.close().await {
            Ok(mut transport) => transport.close(),
            Err((mut transport, e)) => {
                debug!("TLS close returned error: {:?}", Debug2Format(&e));
                transport.close();
            }
        }
        exit
    }

    async fn run_udp(&self, stack: Stack<'static>, request: &OpenRequest) -> Exit {
        let mut rx_meta = [PacketMetadata::EMPTY; UDP_PACKETS];
        let mut rx_buffer = [0u8; SOCKET_BUF_SIZE];
        let mut tx_meta = [PacketMetadata::EMPTY; UDP_PACKETS];
        let mut tx_buffer = [0u8; SOCKET_BUF_SIZE];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );

        let local_port = if request.flags.is_server() {
            request.port
        } else {
            0
        };
        if socket.bind(local_port).is_err() {
            warn!("UDP bind to port {} failed", local_port);
            return Exit::Dropped;
        }

        // a client talks to its configured peer, a server to whoever
        // sends the first datagram
        let mut peer = match request.remote {
            Some(remote) => match to_stack_addr(remote) {
                Some(addr) => Some(IpEndpoint::new(addr, request.port)),
                None => return Exit::Dropped,
            },
            None => None,
        };
        if peer.is_some() {
            self.publish_info(socket.endpoint().port, peer, request.interface);
            self.set_state(SocketState::Connected);
        }

        let mut inbound = [0u8; CHUNK];
        let mut outbound = [0u8; CHUNK];
        loop {
            let activity = match select3(
                socket.recv_from(&mut inbound),
                self.tx.read(&mut outbound),
                self.commands.wait(),
            )
            .await
            {
                Either3::First(Ok((len, meta))) => {
                    if peer.is_none() {
                        peer = Some(meta.endpoint);
                        self.publish_info(socket.endpoint().port, peer, request.interface);
                        self.set_state(SocketState::Connected);
                    }
                    Activity::Inbound(Ok(len))
                }
                Either3::First(Err(_)) => Activity::Inbound(Err(())),
                Either3::Second(len) => Activity::Outbound(len),
                Either3::Third(command) => Activity::Command(command),
            };

            match activity {
                Activity::Inbound(Ok(len)) => {
                    if let Either::Second(()) =
                        select(self.rx.write_all(&inbound[..len]), self.close_requested()).await
                    {
                        return Exit::Closed;
                    }
                }
                // truncated datagram
                Activity::Inbound(Err(())) => {}
                Activity::Outbound(len) => {
                    if let Some(peer) = peer {
                        if socket.send_to(&outbound[..len], peer).await.is_err() {
                            warn!("UDP send failed");
                        }
                    }
                }
                Activity::Command(Command::Close) => return Exit::Closed,
                Activity::Command(Command::StartTls) => self.set_tls(TlsPhase::Failed),
                Activity::Command(Command::Open(_)) => {}
            }
        }
    }

    /// Shuttle bytes between a connected stream and the pipes
    async fn pump<T>(&self, io: &mut T, allow_upgrade: bool) -> Stop
    where
        T: Read + Write,
    {
        let mut inbound = [0u8; CHUNK];
        let mut outbound = [0u8; CHUNK];
        loop {
            let activity = if self.state() == SocketState::PeerClosed {
                match select(self.tx.read(&mut outbound), self.commands.wait()).await {
                    Either::First(len) => Activity::Outbound(len),
                    Either::Second(command) => Activity::Command(command),
                }
            } else {
                match select3(
                    io.read(&mut inbound),
                    self.tx.read(&mut outbound),
                    self.commands.wait(),
                )
                .await
                {
                    Either3::First(result) => Activity::Inbound(result),
                    Either3::Second(len) => Activity::Outbound(len),
                    Either3::Third(command) => Activity::Command(command),
                }
            };

            match activity {
                Activity::Inbound(Ok(0)) => {
                    info!("Peer closed the connection");
                    self.set_state(SocketState::PeerClosed);
                }
                Activity::Inbound(Ok(len)) => {
                    if let Either::Second(()) =
                        select(self.rx.write_all(&inbound[..len]), self.close_requested()).await
                    {
                        return Stop::Exit(Exit::Closed);
                    }
                }
                Activity::Inbound(Err(_)) => {
                    warn!("Connection reset");
                    return Stop::Exit(Exit::Dropped);
                }
                Activity::Outbound(len) => {
                    if io.write_all(&outbound[..len]).await.is_err() || io.flush().await.is_err()
                    {
                        warn!("Connection write failed");
                        return Stop::Exit(Exit::Dropped);
                    }
                }
                Activity::Command(Command::Close) => return Stop::Exit(Exit::Closed),
                Activity::Command(Command::StartTls) if allow_upgrade => return Stop::StartTls,
                Activity::Command(_) => {}
            }
        }
    }
}

/// `embedded-io-async` 0.7 view of an embassy-net TCP socket, as needed
/// by `embedded-tls`
pub struct AsyncTcpSocket<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> AsyncTcpSocket<'a> {
    pub fn new(socket: TcpSocket<'a>) -> Self {
        Self { socket }
    }

    pub fn close(&mut self) {
        self.socket.close();
    }
}

impl ErrorType for AsyncTcpSocket<'_> {
    type Error = NetworkError;
}

impl Read for AsyncTcpSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket
            .read(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}

impl Write for AsyncTcpSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket
            .write(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket
            .flush()
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}
