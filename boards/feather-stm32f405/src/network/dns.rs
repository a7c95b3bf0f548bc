#![deny(unsafe_code)]
//! DNS bridge: polled queries on top of `Stack::dns_query`
//!
//! `start_query` queues a host name; the bridge task resolves it and
//! parks the answer until `poll_query` collects it.

use core::cell::RefCell;
use core::net::IpAddr;

use defmt::{info, warn};
use embassy_net::dns::DnsQueryType;
use embassy_net::{IpAddress, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};
use heapless::FnvIndexMap;
use sysnet_core::HostName;
use sysnet_hal::{DnsError, QueryStatus};

/// Queries that may be outstanding at once
const MAX_QUERIES: usize = 4;

/// Time after which a query counts as a server timeout
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

type Answers = FnvIndexMap<HostName, QueryStatus, MAX_QUERIES>;

pub struct DnsBridge {
    requests: Channel<CriticalSectionRawMutex, HostName, MAX_QUERIES>,
    answers: Mutex<CriticalSectionRawMutex, RefCell<Answers>>,
}

impl DnsBridge {
    pub const fn new() -> Self {
        Self {
            requests: Channel::new(),
            answers: Mutex::new(RefCell::new(FnvIndexMap::new())),
        }
    }

    pub fn start_query(&self, host: &str) -> Result<(), DnsError> {
        let name = HostName::try_from(host).map_err(|_| DnsError::InvalidName)?;
        if name.is_empty() {
            return Err(DnsError::InvalidName);
        }

        self.answers.lock(|answers| {
            let mut answers = answers.borrow_mut();
            if answers.get(&name) == Some(&QueryStatus::Pending) {
                // already in flight
                return Ok(());
            }
            answers
                .insert(name.clone(), QueryStatus::Pending)
                .map_err(|_| DnsError::Busy)?;
            self.requests.try_send(name.clone()).map_err(|_| {
                answers.remove(&name);
                DnsError::Busy
            })
        })
    }

    pub fn poll_query(&self, host: &str) -> QueryStatus {
        let Ok(name) = HostName::try_from(host) else {
            return QueryStatus::Failed(DnsError::InvalidName);
        };
        self.answers.lock(|answers| {
            let mut answers = answers.borrow_mut();
            match answers.get(&name).copied() {
                Some(QueryStatus::Pending) => QueryStatus::Pending,
                Some(settled) => {
                    answers.remove(&name);
                    settled
                }
                None => QueryStatus::Failed(DnsError::NotStarted),
            }
        })
    }

    fn settle(&self, name: &HostName, status: QueryStatus) {
        self.answers.lock(|answers| {
            if let Some(slot) = answers.borrow_mut().get_mut(name) {
                *slot = status;
            }
        });
    }

    /// Resolve queued names, one at a time
    pub async fn run(&self, stack: Stack<'static>) -> ! {
        loop {
            let name = self.requests.receive().await;
            let status = match with_timeout(
                QUERY_TIMEOUT,
                stack.dns_query(name.as_str(), DnsQueryType::A),
            )
            .await
            {
                Err(_) => {
                    warn!("DNS query for {} timed out", name.as_str());
                    QueryStatus::ServerTimeout
                }
                Ok(Err(_)) => {
                    warn!("DNS query for {} failed", name.as_str());
                    QueryStatus::Failed(DnsError::NoServer)
                }
                Ok(Ok(addrs)) => match addrs.first().copied().and_then(to_core_addr) {
                    Some(addr) => {
                        info!("Resolved {}", name.as_str());
                        QueryStatus::Resolved(addr)
                    }
                    None => QueryStatus::Failed(DnsError::NoRecord),
                },
            };
            self.settle(&name, status);
        }
    }
}

pub fn to_core_addr(addr: IpAddress) -> Option<IpAddr> {
    match addr {
        IpAddress::Ipv4(v4) => Some(IpAddr::V4(v4)),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

pub fn to_stack_addr(addr: IpAddr) -> Option<IpAddress> {
    match addr {
        IpAddr::V4(v4) => Some(IpAddress::Ipv4(v4)),
        IpAddr::V6(_) => None,
    }
}
