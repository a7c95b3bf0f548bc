#![deny(unsafe_code)]
//! SNTP client feeding the session service's wall clock

use core::cell::Cell;

use defmt::{error, info, warn, Debug2Format};
use embassy_futures::select::{select, Either};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};

use super::config::SntpConfig;
use super::error::NetworkError;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const NTP_PORT: u16 = 123;

/// Delay before retrying after every server failed
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Unix time with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub unix_secs: u64,
    pub micros: u32,
}

impl Timestamp {
    /// Convert an NTP seconds/fraction pair
    pub fn from_ntp(ntp_secs: u64, fraction: u32) -> Self {
        Self {
            unix_secs: ntp_secs.saturating_sub(NTP_UNIX_OFFSET),
            micros: ((u64::from(fraction) * 1_000_000) >> 32) as u32,
        }
    }
}

/// Last synchronized time, extrapolated with the monotonic clock
pub struct SntpClock {
    synced: Mutex<CriticalSectionRawMutex, Cell<Option<(u64, Instant)>>>,
}

impl SntpClock {
    pub const fn new() -> Self {
        Self {
            synced: Mutex::new(Cell::new(None)),
        }
    }

    fn set(&self, timestamp: Timestamp) {
        let now = Instant::now();
        self.synced
            .lock(|synced| synced.set(Some((timestamp.unix_secs, now))));
    }

    /// Seconds since the Unix epoch, `None` before the first sync
    pub fn unix_seconds(&self) -> Option<u64> {
        let (base, at) = self.synced.lock(|synced| synced.get())?;
        Some(base + Instant::now().duration_since(at).as_secs())
    }
}

/// SNTP client for time synchronization
pub struct SntpClient {
    config: SntpConfig,
}

impl SntpClient {
    pub fn new(config: SntpConfig) -> Self {
        Self { config }
    }

    /// Keep `clock` synchronized for as long as the firmware runs
    pub async fn run(&self, stack: Stack<'static>, clock: &SntpClock) -> ! {
        loop {
            stack.wait_config_up().await;
            match self.sync(&stack).await {
                Ok(timestamp) => {
                    clock.set(timestamp);
                    Timer::after(Duration::from_secs(self.config.resync_secs)).await;
                }
                Err(e) => {
                    warn!("SNTP sync failed: {}", e);
                    Timer::after(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn sync(&self, stack: &Stack<'static>) -> Result<Timestamp, NetworkError> {
        info!("Starting SNTP synchronization");
        for server in self.config.servers {
            for attempt in 0..self.config.retry_count {
                info!(
                    "Attempting SNTP sync with {} (attempt {})",
                    server,
                    attempt + 1
                );
                match self.sntp_request(stack, server).await {
                    Ok(timestamp) => {
                        info!(
                            "SNTP sync successful: {}.{:06} UTC",
                            timestamp.unix_secs, timestamp.micros
                        );
                        return Ok(timestamp);
                    }
                    Err(e) => {
                        warn!("SNTP sync failed: {:?}, retrying...", e);
                        Timer::after(Duration::from_millis(2000)).await;
                    }
                }
            }
        }
        error!("All SNTP sync attempts failed");
        Err(NetworkError::AllServersFailed)
    }

    async fn sntp_request(
        &self,
        stack: &Stack<'static>,
        server: &str,
    ) -> Result<Timestamp, NetworkError> {
        let server_ip = stack
            .dns_query(server, DnsQueryType::A)
            .await
            .map_err(|_| NetworkError::DnsError)?
            .first()
            .copied()
            .ok_or(NetworkError::DnsError)?;

        let server_endpoint = IpEndpoint::new(server_ip, NTP_PORT);
        info!("Resolved {} to {}", server, Debug2Format(&server_endpoint));

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 64];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_buffer = [0u8; 64];
        let mut socket = UdpSocket::new(
            *stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NetworkError::SocketError)?;

        // NTP request: LI=0, VN=3, Mode=3 (Client)
        let mut ntp_packet = [0u8; 48];
        ntp_packet[0] = 0x1B;
        let transmit_time = Instant::now();
        socket
            .send_to(&ntp_packet, server_endpoint)
            .await
            .map_err(|_| NetworkError::SocketError)?;

        let mut response = [0u8; 48];
        let timeout = Timer::after(Duration::from_millis(self.config.timeout_ms));
        let (recv_len, from_addr) = match select(timeout, socket.recv_from(&mut response)).await {
            Either::First(_) => return Err(NetworkError::Timeout),
            Either::Second(result) => result.map_err(|_| NetworkError::SocketError)?,
        };
        let receive_time = Instant::now();

        if recv_len < 48 || from_addr.endpoint.addr != server_ip {
            return Err(NetworkError::InvalidResponse);
        }

        let stratum = response[1];
        if stratum == 0 || stratum > self.config.max_stratum {
            warn!(
                "Invalid stratum {} (max {})",
                stratum, self.config.max_stratum
            );
            return Err(NetworkError::ServerError);
        }

        let tx_timestamp_secs =
            u32::from_be_bytes([response[40], response[41], response[42], response[43]]) as u64;
        let tx_timestamp_frac =
            u32::from_be_bytes([response[44], response[45], response[46], response[47]]);

        let rtt = receive_time.duration_since(transmit_time);
        let rtt_correction_micros = rtt.as_micros() / 2;

        let mut timestamp = Timestamp::from_ntp(tx_timestamp_secs, tx_timestamp_frac);
        timestamp.micros = timestamp
            .micros
            .saturating_add(rtt_correction_micros as u32);
        if timestamp.micros >= 1_000_000 {
            timestamp.unix_secs = timestamp.unix_secs.saturating_add(1);
            timestamp.micros -= 1_000_000;
        }
        Ok(timestamp)
    }
}
