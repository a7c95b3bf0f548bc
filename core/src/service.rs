//! Public session API
//!
//! All operations return immediately. An operation that finds the instance
//! lock held by another context fails with `Error::LockOperationFailed`
//! (or, for `task`, skips the tick); only `open` retries the lock, a
//! bounded number of times.

use heapless::Vec;
use sysnet_hal::{NetStack, SocketInfo, SocketState};

use crate::config::{ConfigParam, HostName, IpProtocol, Mode, ServiceConfig, SessionConfig};
use crate::error::Error;
use crate::event::{Event, EventHandler};
use crate::fsm::{self, Context};
use crate::instance::Instance;
use crate::link::lower_layer_ready;
use crate::pipe::SessionPipe;
use crate::pool::{Handle, Pool};
use crate::status::SessionStatus;

/// Lock attempts `open` makes before giving up on a freshly claimed slot
const OPEN_LOCK_ATTEMPTS: usize = 64;

/// Default number of concurrent sessions
pub const DEFAULT_CAPACITY: usize = 2;

/// Out-of-band session commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control<'c> {
    /// Drop the connection and start over, optionally with a new
    /// configuration
    Reconnect(Option<&'c SessionConfig>),
    /// Drop the connection; with auto-reconnect on, a new attempt follows
    Disconnect,
}

/// Snapshot of a session for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub status: SessionStatus,
    pub mode: Mode,
    pub ip_protocol: IpProtocol,
    pub host_name: HostName,
    pub port: u16,
    pub auto_reconnect: bool,
    pub tls_enabled: bool,
    /// Endpoints of the current connection
    pub socket: Option<SocketInfo>,
}

/// Network session service over a TCP/IP stack
///
/// Holds up to `N` sessions. Shared by reference between the context that
/// drives [`poll`](Self::poll) and the application contexts that send and
/// receive.
pub struct NetService<'a, S: NetStack, const N: usize = DEFAULT_CAPACITY> {
    stack: S,
    config: ServiceConfig,
    pool: Pool<'a, S::Socket, N>,
}

impl<'a, S: NetStack, const N: usize> NetService<'a, S, N> {
    pub fn new(stack: S) -> Self {
        Self::with_config(stack, ServiceConfig::default())
    }

    pub fn with_config(stack: S, config: ServiceConfig) -> Self {
        Self {
            stack,
            config,
            pool: Pool::new(),
        }
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Number of open sessions
    pub fn sessions_in_use(&self) -> usize {
        self.pool.in_use()
    }

    /// Handles of all open sessions, in slot order
    pub fn sessions(&self) -> Vec<Handle, N> {
        (0..N)
            .filter_map(|index| self.pool.handle_at(index))
            .collect()
    }

    fn context(&self, handle: Handle) -> Context<'_, S> {
        Context {
            stack: &self.stack,
            config: &self.config,
            index: handle.index(),
        }
    }

    /// Open a session
    ///
    /// Without a configuration the session uses [`SessionConfig::default`].
    /// If the lower layer is already up, the first connection step (socket
    /// open for servers, address resolution for clients) happens before
    /// returning.
    ///
    /// # Errors
    ///
    /// `Error::Exhausted` when every slot is taken, `Error::LockOperationFailed`
    /// when the claimed slot stays locked.
    pub fn open(
        &self,
        config: Option<&SessionConfig>,
        handler: Option<&'a dyn EventHandler>,
    ) -> Result<Handle, Error> {
        let config = config.cloned().unwrap_or_default();
        let handle = self.pool.allocate().inspect_err(|_| {
            error!("net: no free session (capacity {})", N);
        })?;

        let mut locked = match self.pool.lock_claimed(handle, OPEN_LOCK_ATTEMPTS) {
            Ok(locked) => locked,
            Err(err) => {
                self.pool.free(handle);
                return Err(err);
            }
        };
        *locked = Instance::new(config, handler);

        let ctx = self.context(handle);
        if lower_layer_ready(&self.stack, locked.config.interface) {
            fsm::begin_attempt(&ctx, &mut *locked);
        } else {
            info!("net[{}]: lower layer down, deferring connect", handle.index());
        }
        info!(
            "net[{}]: opened {} {} port {}",
            handle.index(),
            locked.config.mode.as_str(),
            locked.config.ip_protocol.as_str(),
            locked.config.port
        );
        Ok(handle)
    }

    /// Close a session and free its slot
    ///
    /// The handle is invalid afterwards. No event is emitted.
    pub fn close(&self, handle: Handle) -> Result<(), Error> {
        let mut locked = self.pool.lock(handle)?;
        fsm::release_socket(&self.context(handle), &mut *locked);
        *locked = Instance::vacant();
        drop(locked);
        self.pool.free(handle);
        info!("net[{}]: closed", handle.index());
        Ok(())
    }

    /// Advance one session by at most one state transition
    ///
    /// Skips silently when the session is busy in another context or the
    /// handle is stale. Any event is delivered after the lock is released.
    pub fn task(&self, handle: Handle) {
        let Ok(mut locked) = self.pool.lock(handle) else {
            return;
        };
        let event = fsm::step(&self.context(handle), &mut *locked);
        let handler = locked.handler;
        drop(locked);

        if let Some(event) = event {
            self.dispatch(handle, handler, event);
        }
    }

    /// Run [`task`](Self::task) once for every open session
    pub fn poll(&self) {
        for index in 0..N {
            if let Some(handle) = self.pool.handle_at(index) {
                self.task(handle);
            }
        }
    }

    fn dispatch(&self, handle: Handle, handler: Option<&'a dyn EventHandler>, event: Event) {
        trace!("net[{}]: event {}", handle.index(), event.as_str());
        if let Some(handler) = handler {
            handler.on_event(handle, event);
        }
        if event.ends_connection() {
            // On contention the next step picks up the re-arm instead
            if let Ok(mut locked) = self.pool.lock(handle) {
                fsm::rearm(&self.context(handle), &mut *locked);
            }
        }
    }

    /// Send `data` on a connected session
    ///
    /// Returns the number of bytes queued and flushed.
    ///
    /// # Errors
    ///
    /// `Error::ServiceDown` when not connected, `Error::TransmitNotReady`
    /// when the transmit buffer cannot take `data` right now.
    pub fn send_msg(&self, handle: Handle, data: &[u8]) -> Result<usize, Error> {
        self.transmit(handle, data, data.len())
    }

    /// Send as much of `data` as the transmit buffer takes right now
    pub(crate) fn send_some(&self, handle: Handle, data: &[u8]) -> Result<usize, Error> {
        self.transmit(handle, data, 1)
    }

    fn transmit(&self, handle: Handle, data: &[u8], required: usize) -> Result<usize, Error> {
        let locked = self.pool.lock(handle)?;
        let socket = self.live_socket(&locked)?;
        if data.is_empty() {
            return Ok(0);
        }
        let free = self.stack.write_ready(socket, required);
        if free == 0 {
            return Err(Error::TransmitNotReady);
        }
        let sent = self
            .stack
            .write(socket, &data[..free.min(data.len())])
            .map_err(|_| {
                warn!("net[{}]: write failed", handle.index());
                Error::Failure
            })?;
        self.stack.flush(socket).map_err(|_| Error::Failure)?;
        Ok(sent)
    }

    /// Read buffered data from a connected session
    ///
    /// Reads at most `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// `Error::ServiceDown` when not connected, `Error::ReceiveNotReady`
    /// when nothing is buffered.
    pub fn recv_msg(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, Error> {
        let locked = self.pool.lock(handle)?;
        let socket = self.live_socket(&locked)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let available = self.stack.read_ready(socket);
        if available == 0 {
            return Err(Error::ReceiveNotReady);
        }
        let len = available.min(buf.len());
        self.stack.read(socket, &mut buf[..len]).map_err(|_| {
            warn!("net[{}]: read failed", handle.index());
            Error::Failure
        })
    }

    /// Socket of a session that may carry data right now
    fn live_socket(&self, inst: &Instance<'a, S::Socket>) -> Result<S::Socket, Error> {
        let socket = match inst.socket {
            Some(socket) if inst.status.is_up() => socket,
            _ => return Err(Error::ServiceDown),
        };
        let open = matches!(
            self.stack.state(socket),
            SocketState::Connected | SocketState::PeerClosed
        );
        if !open || !lower_layer_ready(&self.stack, inst.config.interface) {
            return Err(Error::ServiceDown);
        }
        Ok(socket)
    }

    /// Reconnect or disconnect a session
    pub fn ctrl_msg(&self, handle: Handle, msg: Control<'_>) -> Result<(), Error> {
        let mut locked = self.pool.lock(handle)?;
        let ctx = self.context(handle);
        match msg {
            Control::Reconnect(config) => {
                fsm::release_socket(&ctx, &mut *locked);
                if let Some(config) = config {
                    locked.apply_config(config.clone());
                }
                info!("net[{}]: reconnecting", handle.index());
                locked.status = SessionStatus::LowerLayerDown;
                Ok(())
            }
            Control::Disconnect => {
                if locked.status == SessionStatus::Disconnected {
                    return Ok(());
                }
                fsm::release_socket(&ctx, &mut *locked);
                locked.status = SessionStatus::Disconnected;
                let handler = locked.handler;
                drop(locked);
                info!("net[{}]: disconnected by application", handle.index());
                self.dispatch(handle, handler, Event::Disconnected);
                Ok(())
            }
        }
    }

    /// Whether the session's last connection was closed by the peer
    pub(crate) fn finished_by_peer(&self, handle: Handle) -> Result<bool, Error> {
        Ok(self.pool.lock(handle)?.peer_finished)
    }

    /// Current status, without taking the instance lock
    pub fn status(&self, handle: Handle) -> Result<SessionStatus, Error> {
        self.pool.status(handle)
    }

    pub fn set_config_param(&self, handle: Handle, param: ConfigParam) -> Result<(), Error> {
        let mut locked = self.pool.lock(handle)?;
        match param {
            ConfigParam::AutoReconnect(enable) => locked.config.auto_reconnect = enable,
            ConfigParam::TlsEnabled(enable) => locked.config.tls_enabled = enable,
        }
        Ok(())
    }

    /// Configuration and connection details of a session
    pub fn info(&self, handle: Handle) -> Result<SessionInfo, Error> {
        let locked = self.pool.lock(handle)?;
        Ok(SessionInfo {
            status: locked.status,
            mode: locked.config.mode,
            ip_protocol: locked.config.ip_protocol,
            host_name: locked.config.host_name.clone(),
            port: locked.config.port,
            auto_reconnect: locked.config.auto_reconnect,
            tls_enabled: locked.config.tls_enabled,
            socket: locked.info,
        })
    }

    /// Byte-stream view of a session for `embedded-io-async` consumers
    pub fn pipe(&self, handle: Handle) -> SessionPipe<'_, 'a, S, N> {
        SessionPipe::new(self, handle)
    }
}
