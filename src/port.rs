//! Port allocation for new instances.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// How long a handed out port is withheld from other callers.
pub const RESERVATION_TTL: Duration = Duration::from_secs(15);

const MAX_ATTEMPTS: usize = 32;

/// Chooses the port an instance listens on.
#[async_trait]
pub trait PortAllocator: Send + Sync {
    /// Returns a free port on `host`, `preferred` if it is available.
    async fn allocate(&self, preferred: Option<u16>, host: &str) -> Result<u16>;
}

/// Ports recently handed out.
#[derive(Debug, Default)]
pub struct PortReservations {
    ports: Mutex<HashMap<u16, Instant>>,
}

static GLOBAL_RESERVATIONS: OnceLock<Arc<PortReservations>> = OnceLock::new();

impl PortReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reservations shared by the whole process.
    pub fn global() -> Arc<PortReservations> {
        Arc::clone(GLOBAL_RESERVATIONS.get_or_init(|| Arc::new(Self::new())))
    }

    /// Reserves `port` until `now + ttl` unless it is already reserved.
    fn try_reserve(&self, port: u16, now: Instant, ttl: Duration) -> bool {
        let Ok(mut ports) = self.ports.lock() else {
            return true;
        };
        ports.retain(|_, until| *until > now);
        if ports.contains_key(&port) {
            return false;
        }
        ports.insert(port, now + ttl);
        true
    }

    /// Whether `port` is currently reserved.
    pub fn is_reserved(&self, port: u16) -> bool {
        let now = Instant::now();
        self.ports
            .lock()
            .map(|ports| ports.get(&port).is_some_and(|until| *until > now))
            .unwrap_or(false)
    }
}

/// Allocates ports the OS reports as free.
///
/// The preferred port is used when it can be bound and was not handed out in
/// the last [`RESERVATION_TTL`]; otherwise the OS picks one. Ports handed out
/// are reserved process-wide, so two instances started at the same time never
/// get the same port.
#[derive(Debug, Clone)]
pub struct FreePortAllocator {
    reservations: Arc<PortReservations>,
    ttl: Duration,
}

impl FreePortAllocator {
    pub fn new() -> Self {
        Self::with_reservations(PortReservations::global(), RESERVATION_TTL)
    }

    pub fn with_reservations(reservations: Arc<PortReservations>, ttl: Duration) -> Self {
        Self { reservations, ttl }
    }

    async fn is_bindable(host: &str, port: u16) -> Option<u16> {
        TcpListener::bind((host, port))
            .await
            .ok()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }
}

impl Default for FreePortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortAllocator for FreePortAllocator {
    #[tracing::instrument(skip(self))]
    async fn allocate(&self, preferred: Option<u16>, host: &str) -> Result<u16> {
        if let Some(port) = preferred.filter(|port| *port != 0) {
            if Self::is_bindable(host, port).await.is_some()
                && self.reservations.try_reserve(port, Instant::now(), self.ttl)
            {
                return Ok(port);
            }
            tracing::debug!(port, "Preferred port unavailable, choosing another");
        }

        for _ in 0..MAX_ATTEMPTS {
            let Some(port) = Self::is_bindable(host, 0).await else {
                break;
            };
            if self.reservations.try_reserve(port, Instant::now(), self.ttl) {
                tracing::debug!(port, "Allocated port");
                return Ok(port);
            }
        }

        Err(Error::Other(format!("Could not find a free port on {}", host)))
    }
}
