//! Lower layer readiness check

use sysnet_hal::LinkMonitor;

/// Readiness of the interface beneath the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    /// No physical link
    Down,
    /// Linked, but no IP configuration yet
    NoAddress,
    Ready,
}

impl LinkStatus {
    pub fn query<L: LinkMonitor + ?Sized>(link: &L, interface: u8) -> Self {
        if !link.link_up(interface) {
            Self::Down
        } else if !link.ip_ready(interface) {
            Self::NoAddress
        } else {
            Self::Ready
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Link up and IP configured on `interface`
pub fn lower_layer_ready<L: LinkMonitor + ?Sized>(link: &L, interface: u8) -> bool {
    LinkStatus::query(link, interface).is_ready()
}
