// Copyright 2026 ThermoLink Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TCP port acquisition with fallback candidates.

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, warn};

/// Fallback ports probed in order when the preferred port is occupied.
pub const DEFAULT_FALLBACK_PORTS: [u16; 5] = [8081, 8082, 8083, 8090, 9000];

#[derive(Debug, Error)]
pub enum PortError {
    /// The preferred port and every fallback candidate are occupied.
    #[error("no usable port: preferred port and all fallbacks are occupied")]
    AllPortsExhausted,

    /// Socket setup failed for reasons other than the address being in use.
    #[error("port probe failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds a bindable TCP port for the ingestion server.
///
/// Probing is bind-and-release and therefore racy against other processes;
/// the caller must treat the returned port as a best-effort reservation,
/// not a guarantee.
pub struct PortAllocator {
    fallbacks: Vec<u16>,
    settle: Duration,
}

impl PortAllocator {
    /// `settle` is waited after each bind-and-release so the OS can finish
    /// tearing the probe socket down (TIME_WAIT) before the caller rebinds.
    pub fn new(fallbacks: Vec<u16>, settle: Duration) -> Self {
        Self { fallbacks, settle }
    }

    /// Acquire a usable port, preferring `preferred`.
    ///
    /// 1. Probe `preferred` with an exclusive bind.
    /// 2. If occupied, attempt a forced release by binding with address
    ///    reuse and dropping immediately, then re-probe. This cannot make
    ///    another process's listener yield the port; it only clears stale
    ///    local state.
    /// 3. Probe the fallback list in order; first success wins.
    pub async fn acquire(&self, preferred: u16) -> Result<u16, PortError> {
        if self.probe(preferred).await {
            return Ok(preferred);
        }

        warn!(port = preferred, "preferred port occupied, attempting forced release");
        self.force_release(preferred).await;
        if self.probe(preferred).await {
            info!(port = preferred, "preferred port reclaimed after forced release");
            return Ok(preferred);
        }

        for &candidate in &self.fallbacks {
            if self.probe(candidate).await {
                info!(port = candidate, "falling back to alternate port");
                return Ok(candidate);
            }
            debug!(port = candidate, "fallback port occupied");
        }

        Err(PortError::AllPortsExhausted)
    }

    /// Exclusive bind-and-release probe.
    async fn probe(&self, port: u16) -> bool {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                drop(listener);
                tokio::time::sleep(self.settle).await;
                true
            }
            Err(_) => false,
        }
    }

    /// Best-effort reuse-bind to shake loose a lingering local socket.
    async fn force_release(&self, port: u16) {
        let result = TcpSocket::new_v4().and_then(|socket| {
            socket.set_reuseaddr(true)?;
            socket.bind((Ipv4Addr::UNSPECIFIED, port).into())?;
            Ok(socket)
        });

        match result {
            Ok(socket) => drop(socket),
            Err(e) => debug!(port, "forced release bind failed: {}", e),
        }

        tokio::time::sleep(self.settle).await;
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_PORTS.to_vec(), Duration::from_millis(250))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(fallbacks: Vec<u16>) -> PortAllocator {
        // No settle in tests; nothing else rebinds the probed port.
        PortAllocator::new(fallbacks, Duration::ZERO)
    }

    async fn ephemeral_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_free_preferred_port_is_returned() {
        let (listener, port) = ephemeral_port().await;
        drop(listener);

        let got = allocator(vec![]).acquire(port).await.unwrap();
        assert_eq!(got, port);
    }

    #[tokio::test]
    async fn test_occupied_preferred_falls_back() {
        // Hold the preferred port on the wildcard address so the exclusive
        // probe cannot bind it.
        let preferred_listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let preferred = preferred_listener.local_addr().unwrap().port();

        let (fallback_listener, fallback) = ephemeral_port().await;
        drop(fallback_listener);

        let got = allocator(vec![fallback]).acquire(preferred).await.unwrap();
        assert_eq!(got, fallback);
    }

    #[tokio::test]
    async fn test_all_occupied_is_exhausted() {
        let held_a = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let held_b = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let a = held_a.local_addr().unwrap().port();
        let b = held_b.local_addr().unwrap().port();

        let err = allocator(vec![b]).acquire(a).await.unwrap_err();
        assert!(matches!(err, PortError::AllPortsExhausted));
    }

    #[tokio::test]
    async fn test_never_returns_a_held_port() {
        let held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let held_port = held.local_addr().unwrap().port();

        let (free_listener, free_port) = ephemeral_port().await;
        drop(free_listener);

        let got = allocator(vec![free_port]).acquire(held_port).await.unwrap();
        assert_ne!(got, held_port);
    }
}
