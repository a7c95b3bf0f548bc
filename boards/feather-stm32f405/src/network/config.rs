#![deny(unsafe_code)]
//! Network configuration structures

use sysnet_core::{IpProtocol, SessionConfig};

/// SNTP client configuration
#[derive(Debug, Clone)]
pub struct SntpConfig {
    /// NTP servers to try (in order)
    pub servers: &'static [&'static str],
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of retry attempts per server
    pub retry_count: usize,
    /// Maximum accepted stratum level (1-15)
    pub max_stratum: u8,
    /// Seconds between successful syncs
    pub resync_secs: u64,
}

impl Default for SntpConfig {
    fn default() -> Self {
        Self {
            servers: &["pool.ntp.org", "time.google.com", "time.cloudflare.com"],
            timeout_ms: 5000,
            retry_count: 3,
            max_stratum: 3,
            resync_secs: 15 * 60,
        }
    }
}

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Random seed for network stack
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            seed: 0x1234_5678_u64,
        }
    }
}

/// Endpoints of the demo sessions
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    /// Host of the TCP client session
    pub client_host: &'static str,
    pub client_port: u16,
    pub client_tls: bool,
    /// Listening port of the UDP echo server
    pub echo_port: u16,
    /// Interval between service polls
    pub poll_interval_ms: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            client_host: "192.168.1.1",
            client_port: 8883,
            client_tls: true,
            echo_port: 7,
            poll_interval_ms: 10,
        }
    }
}

impl SessionDefaults {
    pub fn client(&self) -> Result<SessionConfig, sysnet_core::Error> {
        Ok(
            SessionConfig::client(IpProtocol::Tcp, self.client_host, self.client_port)?
                .with_tls(self.client_tls),
        )
    }

    pub fn echo_server(&self) -> SessionConfig {
        SessionConfig::server(IpProtocol::Udp, self.echo_port)
    }
}
