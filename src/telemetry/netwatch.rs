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

//! Host network capability detection.
//!
//! The ingestion server only makes sense while the host has an active
//! non-loopback IPv4 address the device can reach (normally the access
//! point interface the device joins). Detection is behind a trait so
//! platforms without a detection mechanism report `Unsupported` instead
//! of guessing.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetProbeError {
    /// No active non-loopback IPv4 interface was found.
    #[error("no active non-loopback IPv4 interface")]
    NoActiveInterface,

    /// The platform offers no way to inspect interface state.
    #[error("network interface detection unsupported: {0}")]
    Unsupported(String),

    #[error("network probe failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reports whether the host currently has a reachable IPv4 address.
pub trait NetworkProbe: Send + Sync {
    /// Address of the active interface the device would connect to.
    fn active_host_addr(&self) -> Result<Ipv4Addr, NetProbeError>;
}

/// Probe backed by the OS routing decision: a connected (but never
/// written) UDP socket reveals which local address the kernel would use
/// to reach the AP subnet. No packet leaves the host.
pub struct HostNetworkProbe {
    target: SocketAddr,
}

impl HostNetworkProbe {
    /// Probe against the conventional AP subnet used by the hotspot.
    pub fn new() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::new(192, 168, 4, 1), 9)),
        }
    }

    /// Probe against a specific peer subnet instead of the default.
    pub fn with_target(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for HostNetworkProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProbe for HostNetworkProbe {
    fn active_host_addr(&self) -> Result<Ipv4Addr, NetProbeError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket
            .connect(self.target)
            .map_err(|_| NetProbeError::NoActiveInterface)?;

        match socket.local_addr()? {
            SocketAddr::V4(v4) if !v4.ip().is_loopback() && !v4.ip().is_unspecified() => {
                Ok(*v4.ip())
            }
            _ => Err(NetProbeError::NoActiveInterface),
        }
    }
}

/// Probe with a fixed answer, for composition in tests and headless runs.
pub struct FixedNetworkProbe {
    addr: Option<Ipv4Addr>,
}

impl FixedNetworkProbe {
    pub fn active(addr: Ipv4Addr) -> Self {
        Self { addr: Some(addr) }
    }

    pub fn inactive() -> Self {
        Self { addr: None }
    }
}

impl NetworkProbe for FixedNetworkProbe {
    fn active_host_addr(&self) -> Result<Ipv4Addr, NetProbeError> {
        self.addr.ok_or(NetProbeError::NoActiveInterface)
    }
}
