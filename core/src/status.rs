//! Session status values and their display names

/// Current state of a session instance
///
/// `Idle` means the slot is free in the pool. The TLS states are only
/// reachable for sessions with TLS enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SessionStatus {
    Idle = 0,
    LowerLayerDown,
    ResolvingDns,
    DnsResolved,
    ServerAwaitingConnection,
    ClientConnecting,
    WaitForTimeSync,
    TlsNegotiating,
    Connected,
    TlsNegotiationFailed,
    DnsResolveFailed,
    SockOpenFailed,
    Disconnected,
    PeerSentFin,
}

/// Display names, indexed by discriminant
const STATUS_NAMES: [&str; 14] = [
    "IDLE",
    "LOWER_LAYER_DOWN",
    "RESOLVING_DNS",
    "DNS_RESOLVED",
    "SERVER_AWAITING_CONNECTION",
    "CLIENT_CONNECTING",
    "WAIT_FOR_SNTP",
    "TLS_NEGOTIATING",
    "CONNECTED",
    "TLS_NEGOTIATION_FAILED",
    "DNS_RESOLVE_FAILED",
    "SOCK_OPEN_FAILED",
    "DISCONNECTED",
    "PEER_SENT_FIN",
];

const ALL: [SessionStatus; 14] = [
    SessionStatus::Idle,
    SessionStatus::LowerLayerDown,
    SessionStatus::ResolvingDns,
    SessionStatus::DnsResolved,
    SessionStatus::ServerAwaitingConnection,
    SessionStatus::ClientConnecting,
    SessionStatus::WaitForTimeSync,
    SessionStatus::TlsNegotiating,
    SessionStatus::Connected,
    SessionStatus::TlsNegotiationFailed,
    SessionStatus::DnsResolveFailed,
    SessionStatus::SockOpenFailed,
    SessionStatus::Disconnected,
    SessionStatus::PeerSentFin,
];

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        STATUS_NAMES[self as usize]
    }

    /// States in which the instance owns an open socket
    pub fn holds_socket(self) -> bool {
        matches!(
            self,
            Self::ServerAwaitingConnection
                | Self::ClientConnecting
                | Self::WaitForTimeSync
                | Self::TlsNegotiating
                | Self::Connected
                | Self::PeerSentFin
        )
    }

    /// States in which application data may flow
    pub fn is_up(self) -> bool {
        matches!(self, Self::Connected | Self::PeerSentFin)
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        ALL.get(value as usize).copied().unwrap_or(Self::Idle)
    }
}

impl core::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_round_trip_covers_every_state() {
        for status in ALL {
            assert_eq!(SessionStatus::from_u8(status as u8), status);
        }
        assert_eq!(SessionStatus::from_u8(200), SessionStatus::Idle);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(SessionStatus::Idle.as_str(), "IDLE");
        assert_eq!(SessionStatus::WaitForTimeSync.as_str(), "WAIT_FOR_SNTP");
        assert_eq!(SessionStatus::PeerSentFin.as_str(), "PEER_SENT_FIN");
    }

    #[test]
    fn test_socket_ownership() {
        assert!(SessionStatus::ClientConnecting.holds_socket());
        assert!(SessionStatus::PeerSentFin.holds_socket());
        assert!(!SessionStatus::Disconnected.holds_socket());
        assert!(!SessionStatus::DnsResolved.holds_socket());
        assert!(!SessionStatus::LowerLayerDown.holds_socket());
    }
}
