//! Events delivered to the application
//!
//! The service invokes the handler after releasing the instance lock, so a
//! handler may call back into `status`, `send_msg` or `recv_msg`.

use sysnet_hal::SocketInfo;

use crate::pool::Handle;

/// Asynchronous session event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Socket connected to the peer (and secured, for TLS sessions)
    Connected(Option<SocketInfo>),
    /// Socket closed by the peer, the link or the application
    Disconnected,
    /// Data is waiting to be read with `recv_msg`
    ReceivedData { available: usize },
    TlsNegotiationFailed,
    DnsResolveFailed,
    SocketOpenFailed,
}

impl Event {
    /// Numeric event code of the C-style API
    pub fn code(&self) -> u8 {
        match self {
            Self::Connected(_) => 0,
            Self::Disconnected => 1,
            Self::ReceivedData { .. } => 2,
            Self::TlsNegotiationFailed => 3,
            Self::DnsResolveFailed => 4,
            Self::SocketOpenFailed => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected(_) => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::ReceivedData { .. } => "RCVD_DATA",
            Self::TlsNegotiationFailed => "SSL_FAILED",
            Self::DnsResolveFailed => "DNS_RESOLVE_FAILED",
            Self::SocketOpenFailed => "SOCK_OPEN_FAILED",
        }
    }

    /// Event that leaves the instance in `Disconnected`
    pub fn ends_connection(&self) -> bool {
        !matches!(self, Self::Connected(_) | Self::ReceivedData { .. })
    }
}

/// Receiver of session events
///
/// Any `Fn(Handle, Event) + Sync` closure is a handler; per-session
/// context is whatever the closure captures.
pub trait EventHandler: Sync {
    fn on_event(&self, handle: Handle, event: Event);
}

impl<F> EventHandler for F
where
    F: Fn(Handle, Event) + Sync,
{
    fn on_event(&self, handle: Handle, event: Event) {
        self(handle, event)
    }
}
