#![deny(unsafe_code)]
//! TLS 1.3 upgrade of connected session sockets using embedded-tls
//!
//! # Limitations
//!
//! - Certificate verification is disabled (`NoVerify`)
//! - Single secured socket at a time (static record buffers, see
//!   `src/tls_buffers.rs`)

use defmt::{error, info, Debug2Format};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};
use embedded_tls::{
    Aes128GcmSha256, CryptoProvider, NoVerify, TlsConfig, TlsConnection, TlsContext, TlsVerifier,
};

use super::error::NetworkError;

/// Upper bound on a handshake; the session service applies its own,
/// usually shorter, deadline on top
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Simple crypto provider that wraps an RNG for TLS operations
struct SimpleCryptoProvider<RNG> {
    rng: RNG,
    verifier: NoVerify,
}

impl<RNG> SimpleCryptoProvider<RNG> {
    fn new(rng: RNG) -> Self {
        Self {
            rng,
            verifier: NoVerify,
        }
    }
}

impl<RNG> CryptoProvider for SimpleCryptoProvider<RNG>
where
    RNG: rand_core::CryptoRngCore,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl rand_core::CryptoRngCore {
        &mut self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut self.verifier)
    }
}

/// Handshake driver shared by all socket bridges
///
/// Owns the hardware RNG; bridges run in one executor, so a
/// `NoopRawMutex` is enough.
pub struct TlsEngine<R> {
    rng: Mutex<NoopRawMutex, R>,
}

impl<R> TlsEngine<R>
where
    R: rand_core::RngCore + rand_core::CryptoRng,
{
    pub fn new(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Run the client handshake on an established connection
    pub async fn handshake<S>(
        &self,
        connection: &mut TlsConnection<'_, S, Aes128GcmSha256>,
    ) -> Result<(), NetworkError>
    where
        S: Read + Write,
    {
        let mut rng = self.rng.lock().await;
        let config = TlsConfig::new();
        let provider = SimpleCryptoProvider::new(&mut *rng);

        info!("Initiating TLS 1.3 handshake with hardware RNG...");
        with_timeout(
            HANDSHAKE_TIMEOUT,
            connection.open(TlsContext::new(&config, provider)),
        )
        .await
        .map_err(|_| {
            error!("TLS handshake timed out");
            NetworkError::Timeout
        })?
        .map_err(|e| {
            error!("TLS handshake failed: {:?}", Debug2Format(&e));
            NetworkError::TlsHandshakeFailed
        })?;

        info!("TLS 1.3 handshake completed");
        Ok(())
    }
}
