//! `embedded-io-async` adapter over a session
//!
//! Lets protocol clients that speak `Read`/`Write` (TLS, MQTT, HTTP) run
//! on top of a session. Transient conditions (empty receive buffer, full
//! transmit buffer, busy instance) yield to the executor and retry. Writes
//! may be partial; a read after the peer's FIN has been drained returns 0.

use embassy_futures::yield_now;
use sysnet_hal::NetStack;

use crate::error::Error;
use crate::pool::Handle;
use crate::service::NetService;

pub struct SessionPipe<'s, 'a, S: NetStack, const N: usize> {
    service: &'s NetService<'a, S, N>,
    handle: Handle,
}

impl<'s, 'a, S: NetStack, const N: usize> SessionPipe<'s, 'a, S, N> {
    pub(crate) fn new(service: &'s NetService<'a, S, N>, handle: Handle) -> Self {
        Self { service, handle }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl<S: NetStack, const N: usize> embedded_io_async::ErrorType for SessionPipe<'_, '_, S, N> {
    type Error = Error;
}

impl<S: NetStack, const N: usize> embedded_io_async::Read for SessionPipe<'_, '_, S, N> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.service.recv_msg(self.handle, buf) {
                Err(Error::ServiceDown) => match self.service.finished_by_peer(self.handle) {
                    Ok(true) => return Ok(0),
                    Ok(false) => return Err(Error::ServiceDown),
                    Err(err) if err.is_retryable() => yield_now().await,
                    Err(err) => return Err(err),
                },
                Err(err) if err.is_retryable() => yield_now().await,
                result => return result,
            }
        }
    }
}

impl<S: NetStack, const N: usize> embedded_io_async::Write for SessionPipe<'_, '_, S, N> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.service.send_some(self.handle, buf) {
                Err(err) if err.is_retryable() => yield_now().await,
                result => return result,
            }
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        // every write is flushed as it is queued
        Ok(())
    }
}
