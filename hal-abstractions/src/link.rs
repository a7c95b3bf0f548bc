//! Lower layer (link + IP) readiness

/// Reports whether a network interface can carry traffic
pub trait LinkMonitor {
    /// Physical link is up on `interface`
    fn link_up(&self, interface: u8) -> bool;

    /// The interface has a usable IP configuration (static or DHCP lease)
    fn ip_ready(&self, interface: u8) -> bool;
}
