#![deny(unsafe_code)]
//! Link and IP configuration state shared with the session service
//!
//! `embassy_net::Stack` stays inside the network task; the service only
//! sees these flags.

use core::sync::atomic::{AtomicBool, Ordering};

use defmt::info;
use embassy_net::Stack;
use embassy_time::{Duration, Ticker};

const LINK_POLL: Duration = Duration::from_millis(100);

pub struct LinkState {
    link_up: AtomicBool,
    ip_ready: AtomicBool,
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            link_up: AtomicBool::new(false),
            ip_ready: AtomicBool::new(false),
        }
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    pub fn ip_ready(&self) -> bool {
        self.ip_ready.load(Ordering::Acquire)
    }

    /// Mirror the stack's link and DHCP state, logging every change
    pub async fn watch(&self, stack: Stack<'static>) -> ! {
        let mut ticker = Ticker::every(LINK_POLL);
        loop {
            let link_up = stack.is_link_up();
            if self.link_up.swap(link_up, Ordering::AcqRel) != link_up {
                info!("Ethernet link {}", if link_up { "up" } else { "down" });
            }

            let ip_ready = link_up && stack.is_config_up();
            if self.ip_ready.swap(ip_ready, Ordering::AcqRel) != ip_ready && ip_ready {
                log_config(&stack);
            }
            ticker.next().await;
        }
    }
}

/// Log IP address and gateway obtained via DHCP
fn log_config(stack: &Stack<'_>) {
    if let Some(config) = stack.config_v4() {
        let octets = config.address.address().octets();
        info!(
            "IP: {}.{}.{}.{}",
            octets[0], octets[1], octets[2], octets[3]
        );

        if let Some(gateway) = config.gateway {
            let gw_octets = gateway.octets();
            info!(
                "Gateway: {}.{}.{}.{}",
                gw_octets[0], gw_octets[1], gw_octets[2], gw_octets[3]
            );
        }
    }
}
