#![deny(unsafe_code)]
//! Demo sessions: a TCP client (TLS by default) and a UDP echo server
//!
//! Events are queued by the handler and acted on from the polling loop,
//! so the handler itself never blocks the service.

use defmt::{error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Ticker};
use sysnet_core::{Error, Event, EventHandler, Handle, NetService};

use crate::network::config::SessionDefaults;
use crate::network::BoardStack;

pub type Service = NetService<'static, BoardStack>;

const EVENT_QUEUE_DEPTH: usize = 8;

const GREETING: &[u8] = b"hello from feather-stm32f405\r\n";

/// Session events waiting for the polling loop
pub struct EventQueue {
    events: Channel<CriticalSectionRawMutex, (Handle, Event), EVENT_QUEUE_DEPTH>,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            events: Channel::new(),
        }
    }
}

impl EventHandler for EventQueue {
    fn on_event(&self, handle: Handle, event: Event) {
        if self.events.try_send((handle, event)).is_err() {
            warn!("Event queue full, dropping {}", event.as_str());
        }
    }
}

static EVENTS: EventQueue = EventQueue::new();

struct Sessions {
    client: Option<Handle>,
    echo: Option<Handle>,
}

/// Open the demo sessions and drive the service forever
pub async fn run(service: &'static Service, defaults: SessionDefaults) -> ! {
    let client = match defaults.client() {
        Ok(config) => open(service, &config),
        Err(e) => {
            error!("Client session config rejected: {}", e);
            None
        }
    };
    let sessions = Sessions {
        client,
        echo: open(service, &defaults.echo_server()),
    };

    let mut ticker = Ticker::every(Duration::from_millis(defaults.poll_interval_ms));
    loop {
        service.poll();
        while let Ok((handle, event)) = EVENTS.events.try_receive() {
            on_event(service, &sessions, handle, event);
        }
        ticker.next().await;
    }
}

fn open(service: &'static Service, config: &sysnet_core::SessionConfig) -> Option<Handle> {
    service
        .open(Some(config), Some(&EVENTS))
        .inspect_err(|e| error!("Failed to open session: {}", e))
        .ok()
}

fn on_event(service: &Service, sessions: &Sessions, handle: Handle, event: Event) {
    match event {
        Event::Connected(info) => {
            info!(
                "Session {} connected (local port {})",
                handle.index(),
                info.map_or(0, |info| info.local_port)
            );
            if sessions.client == Some(handle) {
                send(service, handle, GREETING);
            }
        }
        Event::ReceivedData { .. } => {
            let mut buf = [0u8; 256];
            while let Ok(len) = service.recv_msg(handle, &mut buf) {
                if len == 0 {
                    break;
                }
                if sessions.echo == Some(handle) {
                    send(service, handle, &buf[..len]);
                } else {
                    info!("Session {} received {} bytes", handle.index(), len);
                }
            }
        }
        other => warn!("Session {}: {}", handle.index(), other.as_str()),
    }
}

fn send(service: &Service, handle: Handle, data: &[u8]) {
    match service.send_msg(handle, data) {
        Ok(_) => {}
        Err(Error::TransmitNotReady) => warn!("Session {}: transmit buffer full", handle.index()),
        Err(e) => error!("Session {}: send failed: {}", handle.index(), e),
    }
}
