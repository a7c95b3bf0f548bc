//! Session and service configuration

use core::net::IpAddr;

use embassy_time::Duration;
use heapless::String;
use sysnet_hal::SocketFlags;

use crate::error::Error;

/// Longest host name (DNS name or literal address) a session accepts
pub const MAX_HOSTNAME_LEN: usize = 256;

pub type HostName = String<MAX_HOSTNAME_LEN>;

const DEFAULT_HOST: &str = "192.168.1.1";
const DEFAULT_PORT: u16 = 1883;

/// Who initiates the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Client,
    Server,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Server => "SERVER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpProtocol {
    Udp,
    Tcp,
}

impl IpProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
        }
    }
}

/// Configuration of one session, copied into the instance on open/reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: Mode,
    pub ip_protocol: IpProtocol,
    /// DNS name or literal IPv4/IPv6 address (ignored by servers)
    pub host_name: HostName,
    /// Remote port for clients, listening port for servers
    pub port: u16,
    /// Loop back to `LowerLayerDown` after failures and disconnects
    pub auto_reconnect: bool,
    /// Upgrade the socket to TLS once connected
    pub tls_enabled: bool,
    /// Network interface index
    pub interface: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut host_name = HostName::new();
        // DEFAULT_HOST is far shorter than MAX_HOSTNAME_LEN
        let _ = host_name.push_str(DEFAULT_HOST);
        Self {
            mode: Mode::Client,
            ip_protocol: IpProtocol::Tcp,
            host_name,
            port: DEFAULT_PORT,
            auto_reconnect: true,
            tls_enabled: false,
            interface: 0,
        }
    }
}

impl SessionConfig {
    /// Client session to `host:port`
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `host` is empty or longer than
    /// [`MAX_HOSTNAME_LEN`].
    pub fn client(ip_protocol: IpProtocol, host: &str, port: u16) -> Result<Self, Error> {
        if host.is_empty() {
            return Err(Error::InvalidConfig);
        }
        let mut host_name = HostName::new();
        host_name
            .push_str(host)
            .map_err(|_| Error::InvalidConfig)?;
        Ok(Self {
            mode: Mode::Client,
            ip_protocol,
            host_name,
            port,
            ..Self::default()
        })
    }

    /// Server session listening on `port`
    pub fn server(ip_protocol: IpProtocol, port: u16) -> Self {
        Self {
            mode: Mode::Server,
            ip_protocol,
            host_name: HostName::new(),
            port,
            ..Self::default()
        }
    }

    pub fn with_auto_reconnect(mut self, enable: bool) -> Self {
        self.auto_reconnect = enable;
        self
    }

    pub fn with_tls(mut self, enable: bool) -> Self {
        self.tls_enabled = enable;
        self
    }

    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    /// The host name parsed as an IP address, if it is one
    pub fn literal_address(&self) -> Option<IpAddr> {
        self.host_name.parse().ok()
    }

    /// Socket type flags for opening this session's socket
    ///
    /// Sockets always open in plain text; TLS is negotiated after connect.
    pub fn socket_flags(&self) -> SocketFlags {
        let mut flags = SocketFlags::UNENCRYPTED;
        flags |= match self.mode {
            Mode::Client => SocketFlags::CLIENT,
            Mode::Server => SocketFlags::SERVER,
        };
        flags |= match self.ip_protocol {
            IpProtocol::Tcp => SocketFlags::STREAM,
            IpProtocol::Udp => SocketFlags::DATAGRAM,
        };
        flags
    }
}

/// Runtime-adjustable session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigParam {
    AutoReconnect(bool),
    /// Applies from the next connection attempt
    TlsEnabled(bool),
}

/// Service-wide tuning
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    /// Maximum time for the TLS handshake
    pub tls_handshake_timeout: Duration,
    /// How long a resolved address is trusted across reconnects
    pub dns_cache_lifetime: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tls_handshake_timeout: Duration::from_secs(10),
            dns_cache_lifetime: Duration::from_secs(600),
        }
    }
}
