//! Connection state machine
//!
//! [`step`] advances an instance by at most one transition and is called
//! with the instance lock held. It never waits: every stack interaction is
//! a poll, and a state whose condition is not met yet returns without
//! changing anything. Failure states are terminal for one step, so the
//! failure event goes out on the step after the failure is detected.

use core::net::IpAddr;

use sysnet_hal::{NetStack, OpenRequest, QueryStatus, SocketState};

use crate::config::{Mode, ServiceConfig};
use crate::event::Event;
use crate::instance::{Instance, ResolvedAddress};
use crate::link::LinkStatus;
use crate::status::SessionStatus;

/// What a step needs besides the instance itself
pub(crate) struct Context<'c, S> {
    pub(crate) stack: &'c S,
    pub(crate) config: &'c ServiceConfig,
    /// Pool slot, for log lines
    pub(crate) index: usize,
}

impl<S: NetStack> Context<'_, S> {
    fn link(&self, interface: u8) -> LinkStatus {
        LinkStatus::query(self.stack, interface)
    }
}

fn set_status<S: NetStack, Sock>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, Sock>,
    next: SessionStatus,
) {
    debug_assert!(
        inst.socket.is_none()
            || next.holds_socket()
            || next == SessionStatus::TlsNegotiationFailed,
        "socket left open entering {}",
        next.as_str()
    );
    if inst.status != next {
        debug!(
            "net[{}]: {} -> {}",
            ctx.index,
            inst.status.as_str(),
            next.as_str()
        );
        inst.status = next;
    }
}

/// Close the instance's socket, if it has one
pub(crate) fn release_socket<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
) {
    if let Some(socket) = inst.socket.take() {
        ctx.stack.close(socket);
    }
    inst.info = None;
    inst.secured = false;
    inst.deadline.reset();
}

/// Start a connection attempt from `LowerLayerDown`
///
/// Servers open their listening socket right away. Clients take the
/// cheapest route to an address: a literal host, a fresh cached address,
/// or a new DNS query.
pub(crate) fn begin_attempt<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) {
    match inst.config.mode {
        Mode::Server => {
            let next = if open_socket(ctx, inst, None) {
                SessionStatus::ServerAwaitingConnection
            } else {
                SessionStatus::SockOpenFailed
            };
            set_status(ctx, inst, next);
        }
        Mode::Client => begin_resolution(ctx, inst),
    }
}

fn begin_resolution<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) {
    let now = ctx.stack.now();

    if let Some(addr) = inst.config.literal_address() {
        inst.address = Some(ResolvedAddress::literal(addr, now));
        set_status(ctx, inst, SessionStatus::DnsResolved);
        return;
    }

    if inst
        .address
        .is_some_and(|address| address.is_fresh(now, ctx.config.dns_cache_lifetime))
    {
        trace!("net[{}]: reusing cached address", ctx.index);
        set_status(ctx, inst, SessionStatus::DnsResolved);
        return;
    }

    inst.address = None;
    match ctx.stack.start_query(inst.config.host_name.as_str()) {
        Ok(()) => {
            info!(
                "net[{}]: resolving {}",
                ctx.index,
                inst.config.host_name.as_str()
            );
            set_status(ctx, inst, SessionStatus::ResolvingDns);
        }
        Err(_) if inst.config.auto_reconnect => {
            warn!("net[{}]: DNS query not started, retrying", ctx.index);
            set_status(ctx, inst, SessionStatus::LowerLayerDown);
        }
        Err(_) => {
            error!("net[{}]: DNS query not started", ctx.index);
            set_status(ctx, inst, SessionStatus::DnsResolveFailed);
        }
    }
}

/// Open the instance's socket; `false` when the stack refuses
fn open_socket<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
    remote: Option<IpAddr>,
) -> bool {
    let request = OpenRequest {
        flags: inst.flags,
        remote,
        port: inst.config.port,
        interface: inst.config.interface,
    };
    match ctx.stack.open(&request) {
        Ok(socket) => {
            inst.socket = Some(socket);
            true
        }
        Err(_) => {
            error!(
                "net[{}]: socket open failed ({} port {})",
                ctx.index,
                inst.config.mode.as_str(),
                inst.config.port
            );
            false
        }
    }
}

/// Socket is up (and secured, if required); report it
fn establish<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) -> Event {
    inst.info = inst.socket.and_then(|socket| ctx.stack.info(socket));
    inst.deadline.reset();
    inst.peer_finished = false;
    if let Some(address) = inst.address.as_mut() {
        address.stale = false;
    }
    set_status(ctx, inst, SessionStatus::Connected);
    info!(
        "net[{}]: connected ({} {})",
        ctx.index,
        inst.config.mode.as_str(),
        inst.config.ip_protocol.as_str()
    );
    Event::Connected(inst.info)
}

/// Tear down the socket and report `event`
fn fail<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
    event: Event,
) -> Option<Event> {
    release_socket(ctx, inst);
    set_status(ctx, inst, SessionStatus::Disconnected);
    Some(event)
}

/// Drop a live connection
fn disconnect<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
    link: LinkStatus,
) -> Option<Event> {
    if !link.is_ready() {
        // the network may come back with different routes or DNS answers
        inst.mark_address_stale();
    }
    info!("net[{}]: disconnected", ctx.index);
    fail(ctx, inst, Event::Disconnected)
}

/// Advance `inst` by at most one transition
pub(crate) fn step<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
) -> Option<Event> {
    match inst.status {
        SessionStatus::Idle => None,
        SessionStatus::LowerLayerDown => {
            if ctx.link(inst.config.interface).is_ready() {
                begin_attempt(ctx, inst);
            }
            None
        }
        SessionStatus::ResolvingDns => {
            poll_resolution(ctx, inst);
            None
        }
        SessionStatus::DnsResolved => {
            connect_client(ctx, inst);
            None
        }
        SessionStatus::ServerAwaitingConnection | SessionStatus::ClientConnecting => {
            poll_connect(ctx, inst)
        }
        SessionStatus::WaitForTimeSync => {
            poll_time_sync(ctx, inst);
            None
        }
        SessionStatus::TlsNegotiating => poll_handshake(ctx, inst),
        SessionStatus::Connected => poll_connected(ctx, inst),
        SessionStatus::PeerSentFin => poll_peer_closed(ctx, inst),
        SessionStatus::TlsNegotiationFailed => fail(ctx, inst, Event::TlsNegotiationFailed),
        SessionStatus::DnsResolveFailed => fail(ctx, inst, Event::DnsResolveFailed),
        SessionStatus::SockOpenFailed => fail(ctx, inst, Event::SocketOpenFailed),
        SessionStatus::Disconnected => {
            if inst.config.auto_reconnect {
                set_status(ctx, inst, SessionStatus::LowerLayerDown);
            }
            None
        }
    }
}

/// Put a disconnected instance back in line for a new attempt
pub(crate) fn rearm<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) {
    if inst.status == SessionStatus::Disconnected && inst.config.auto_reconnect {
        set_status(ctx, inst, SessionStatus::LowerLayerDown);
    }
}

fn poll_resolution<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) {
    match ctx.stack.poll_query(inst.config.host_name.as_str()) {
        QueryStatus::Resolved(addr) => {
            inst.address = Some(ResolvedAddress::resolved(addr, ctx.stack.now()));
            set_status(ctx, inst, SessionStatus::DnsResolved);
        }
        QueryStatus::Pending => {}
        QueryStatus::ServerTimeout if inst.config.auto_reconnect => {
            warn!("net[{}]: DNS server timeout, querying again", ctx.index);
            begin_resolution(ctx, inst);
        }
        QueryStatus::ServerTimeout => {
            error!("net[{}]: DNS server timeout", ctx.index);
            set_status(ctx, inst, SessionStatus::DnsResolveFailed);
        }
        QueryStatus::Failed(_) => {
            error!(
                "net[{}]: DNS resolution of {} failed",
                ctx.index,
                inst.config.host_name.as_str()
            );
            set_status(ctx, inst, SessionStatus::DnsResolveFailed);
        }
    }
}

fn connect_client<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) {
    let Some(addr) = inst.address.map(|address| address.addr) else {
        set_status(ctx, inst, SessionStatus::DnsResolveFailed);
        return;
    };
    if open_socket(ctx, inst, Some(addr)) {
        set_status(ctx, inst, SessionStatus::ClientConnecting);
    } else {
        inst.mark_address_stale();
        set_status(ctx, inst, SessionStatus::SockOpenFailed);
    }
}

fn poll_connect<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
) -> Option<Event> {
    let Some(socket) = inst.socket else {
        set_status(ctx, inst, SessionStatus::SockOpenFailed);
        return None;
    };

    match ctx.stack.state(socket) {
        SocketState::Connecting => None,
        SocketState::Closed => {
            warn!("net[{}]: connection refused or reset", ctx.index);
            release_socket(ctx, inst);
            inst.mark_address_stale();
            set_status(ctx, inst, SessionStatus::SockOpenFailed);
            None
        }
        SocketState::Connected | SocketState::PeerClosed => {
            if !ctx.link(inst.config.interface).is_ready() {
                return None;
            }
            if inst.config.tls_enabled {
                inst.deadline
                    .arm(ctx.stack.now(), ctx.config.tls_handshake_timeout);
                set_status(ctx, inst, SessionStatus::WaitForTimeSync);
                None
            } else {
                Some(establish(ctx, inst))
            }
        }
    }
}

/// Certificate validity checks need wall-clock time, so the handshake
/// waits for the first time sync
fn poll_time_sync<S: NetStack>(ctx: &Context<'_, S>, inst: &mut Instance<'_, S::Socket>) {
    let Some(socket) = inst.socket else {
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return;
    };
    if ctx.stack.state(socket) == SocketState::Closed {
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return;
    }
    if !ctx.stack.is_synced() {
        return;
    }
    match ctx.stack.start_encryption(socket) {
        Ok(()) => {
            inst.deadline
                .arm(ctx.stack.now(), ctx.config.tls_handshake_timeout);
            set_status(ctx, inst, SessionStatus::TlsNegotiating);
        }
        Err(_) => {
            error!("net[{}]: TLS handshake could not start", ctx.index);
            set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        }
    }
}

fn poll_handshake<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
) -> Option<Event> {
    let Some(socket) = inst.socket else {
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return None;
    };

    if inst.deadline.expired(ctx.stack.now()) {
        error!("net[{}]: TLS handshake timed out", ctx.index);
        inst.deadline.reset();
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return None;
    }
    if ctx.stack.state(socket) == SocketState::Closed {
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return None;
    }
    if ctx.stack.is_negotiating(socket) {
        return None;
    }
    if !ctx.stack.is_secure(socket) {
        error!("net[{}]: TLS handshake failed", ctx.index);
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return None;
    }

    inst.secured = true;
    Some(establish(ctx, inst))
}

fn poll_connected<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
) -> Option<Event> {
    let link = ctx.link(inst.config.interface);
    let Some(socket) = inst.socket else {
        return disconnect(ctx, inst, link);
    };

    let state = ctx.stack.state(socket);
    if state == SocketState::Closed || !link.is_ready() {
        return disconnect(ctx, inst, link);
    }
    if inst.secured && !ctx.stack.is_secure(socket) {
        error!("net[{}]: secure channel lost", ctx.index);
        set_status(ctx, inst, SessionStatus::TlsNegotiationFailed);
        return None;
    }
    if state == SocketState::PeerClosed {
        inst.peer_finished = true;
        set_status(ctx, inst, SessionStatus::PeerSentFin);
        return None;
    }

    match ctx.stack.read_ready(socket) {
        0 => None,
        available => Some(Event::ReceivedData { available }),
    }
}

/// The peer is done sending; hand out what is buffered, then close
fn poll_peer_closed<S: NetStack>(
    ctx: &Context<'_, S>,
    inst: &mut Instance<'_, S::Socket>,
) -> Option<Event> {
    let link = ctx.link(inst.config.interface);
    let Some(socket) = inst.socket else {
        return disconnect(ctx, inst, link);
    };

    if !link.is_ready() || ctx.stack.state(socket) == SocketState::Closed {
        return disconnect(ctx, inst, link);
    }
    match ctx.stack.read_ready(socket) {
        0 => disconnect(ctx, inst, link),
        available => Some(Event::ReceivedData { available }),
    }
}
