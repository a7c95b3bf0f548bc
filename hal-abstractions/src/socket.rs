//! Presentation socket API
//!
//! A presentation socket is the transport socket of the underlying TCP/IP
//! stack, optionally upgraded to a secure channel after it connects. All
//! calls are polls: connection progress, readable bytes and handshake state
//! are observed, never awaited.

use core::net::{IpAddr, SocketAddr};

bitflags::bitflags! {
    /// Socket type flags computed from a session configuration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SocketFlags: u8 {
        /// Outgoing connection to a remote address
        const CLIENT = 1 << 0;
        /// Local listening socket
        const SERVER = 1 << 1;
        /// TCP
        const STREAM = 1 << 2;
        /// UDP
        const DATAGRAM = 1 << 3;
        /// Opened in plain text; encryption is negotiated later
        const UNENCRYPTED = 1 << 4;
    }
}

/// Parameters for opening a presentation socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub flags: SocketFlags,
    /// Remote address for client sockets, `None` for servers
    pub remote: Option<IpAddr>,
    /// Remote port for clients, listening port for servers
    pub port: u16,
    /// Network interface index
    pub interface: u8,
}

/// Connection progress as observed by polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketState {
    /// Connect in progress, or a server still waiting for its peer
    Connecting,
    /// Established
    Connected,
    /// Peer sent FIN; buffered data may still be read
    PeerClosed,
    /// Reset, refused or closed
    Closed,
}

/// Endpoint details of a connected socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketInfo {
    pub local_port: u16,
    pub remote: Option<SocketAddr>,
    pub interface: u8,
}

/// Presentation socket errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketError {
    /// No free socket in the stack
    NoSocket,
    /// Address family or route not supported
    Unaddressable,
    /// Socket is not connected
    NotConnected,
    /// Transmit buffer has no room
    BufferFull,
    /// Secure channel could not be started
    Encryption,
    /// Handle does not name an open socket
    InvalidSocket,
}

impl core::fmt::Display for SocketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSocket => write!(f, "No free socket"),
            Self::Unaddressable => write!(f, "Address unreachable"),
            Self::NotConnected => write!(f, "Socket not connected"),
            Self::BufferFull => write!(f, "Transmit buffer full"),
            Self::Encryption => write!(f, "Encryption unavailable"),
            Self::InvalidSocket => write!(f, "Invalid socket"),
        }
    }
}

impl core::error::Error for SocketError {}

impl embedded_io::Error for SocketError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::NotConnected => embedded_io::ErrorKind::NotConnected,
            Self::Unaddressable => embedded_io::ErrorKind::AddrNotAvailable,
            Self::NoSocket | Self::BufferFull => embedded_io::ErrorKind::OutOfMemory,
            Self::InvalidSocket => embedded_io::ErrorKind::InvalidInput,
            Self::Encryption => embedded_io::ErrorKind::Other,
        }
    }
}

/// Non-blocking socket operations of the TCP/IP stack
pub trait PresentationSockets {
    /// Stack-specific socket handle
    type Socket: Copy + Eq + core::fmt::Debug;

    /// Open a client or listening socket; returns immediately
    fn open(&self, request: &OpenRequest) -> Result<Self::Socket, SocketError>;

    /// Close a socket; unknown handles are ignored
    fn close(&self, socket: Self::Socket);

    fn state(&self, socket: Self::Socket) -> SocketState;

    /// Number of bytes that can be read without waiting
    fn read_ready(&self, socket: Self::Socket) -> usize;

    /// Free transmit space if at least `required` bytes fit, otherwise 0
    fn write_ready(&self, socket: Self::Socket, required: usize) -> usize;

    fn read(&self, socket: Self::Socket, buf: &mut [u8]) -> Result<usize, SocketError>;

    fn write(&self, socket: Self::Socket, data: &[u8]) -> Result<usize, SocketError>;

    /// Push buffered transmit data onto the wire
    fn flush(&self, socket: Self::Socket) -> Result<(), SocketError>;

    /// Local/remote endpoint details, once connected
    fn info(&self, socket: Self::Socket) -> Option<SocketInfo>;

    /// Begin the secure-channel handshake on a connected socket
    fn start_encryption(&self, socket: Self::Socket) -> Result<(), SocketError>;

    /// Handshake still in progress
    fn is_negotiating(&self, socket: Self::Socket) -> bool;

    /// Handshake finished and the channel is secure
    fn is_secure(&self, socket: Self::Socket) -> bool;
}

impl SocketFlags {
    pub fn is_server(self) -> bool {
        self.contains(Self::SERVER)
    }

    pub fn is_stream(self) -> bool {
        self.contains(Self::STREAM)
    }
}
