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

//! Device session registry.
//!
//! One physical device has two independent transports: the BLE link used
//! for provisioning and the WebSocket session used for telemetry. The
//! registry keeps both halves associated with the device's MAC so they
//! stay consistent across reconnects. Losing BLE never tears down a live
//! ingestion session; it only marks the BLE half as needing reconnection.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bluer::Address;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::ble::{BleConnectionState, DeviceIdentity, ProvisioningClient};
use crate::status_probe::DeviceStatusReport;

/// The ingestion half of a device's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLink {
    pub session_id: u64,
    pub peer: SocketAddr,
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    identity: DeviceIdentity,
    ble: BleConnectionState,
    session: Option<SessionLink>,
    /// Last IP the device reported over the out-of-band status channel;
    /// used to match an opening ingestion session back to its MAC.
    ip_hint: Option<IpAddr>,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub identity: DeviceIdentity,
    pub ble: BleConnectionState,
    pub session: Option<SessionLink>,
}

/// Registry of known devices keyed by MAC address.
#[derive(Default)]
pub struct DeviceSessionRegistry {
    entries: RwLock<HashMap<Address, DeviceEntry>>,
}

impl DeviceSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scan observation. Identity is immutable once discovered;
    /// re-observations are ignored.
    pub fn observe_device(&self, identity: DeviceIdentity) {
        let mut entries = self.entries.write();
        entries.entry(identity.address).or_insert_with(|| {
            info!(address = %identity.address, class = ?identity.class, "device discovered");
            DeviceEntry {
                identity,
                ble: BleConnectionState::Disconnected,
                session: None,
                ip_hint: None,
            }
        });
    }

    /// Track a BLE state transition for a known device.
    ///
    /// A transition to Disconnected leaves any ingestion session attached:
    /// once the device is on WiFi the two transports are independent.
    pub fn set_ble_state(&self, address: Address, state: BleConnectionState) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&address) else {
            debug!(address = %address, "BLE state change for unknown device ignored");
            return;
        };
        if state == BleConnectionState::Disconnected && entry.session.is_some() {
            debug!(address = %address, "BLE dropped, ingestion session kept");
        }
        entry.ble = state;
    }

    /// Feed an out-of-band status report; the reported IP becomes the
    /// session-matching hint.
    pub fn note_status_report(&self, address: Address, report: &DeviceStatusReport) {
        let Ok(ip) = report.ip_address.parse::<IpAddr>() else {
            warn!(address = %address, "status report carries unparseable IP: {}", report.ip_address);
            return;
        };
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&address) {
            entry.ip_hint = Some(ip);
        }
    }

    /// Find the device an opening session most likely belongs to.
    pub fn match_session_peer(&self, peer: SocketAddr) -> Option<Address> {
        let entries = self.entries.read();
        entries
            .iter()
            .find(|(_, entry)| entry.ip_hint == Some(peer.ip()))
            .map(|(address, _)| *address)
    }

    /// Attach an ingestion session to a device.
    pub fn attach_session(&self, address: Address, link: SessionLink) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&address) {
            info!(address = %address, session = link.session_id, "ingestion session attached");
            entry.session = Some(link);
        }
    }

    /// Detach whichever device holds the given session id.
    pub fn detach_session(&self, session_id: u64) {
        let mut entries = self.entries.write();
        for (address, entry) in entries.iter_mut() {
            if entry.session.as_ref().map(|s| s.session_id) == Some(session_id) {
                info!(address = %address, session = session_id, "ingestion session detached");
                entry.session = None;
                return;
            }
        }
    }

    pub fn snapshot(&self, address: Address) -> Option<DeviceSnapshot> {
        let entries = self.entries.read();
        entries.get(&address).map(|entry| DeviceSnapshot {
            identity: entry.identity.clone(),
            ble: entry.ble,
            session: entry.session.clone(),
        })
    }

    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        let entries = self.entries.read();
        entries
            .values()
            .map(|entry| DeviceSnapshot {
                identity: entry.identity.clone(),
                ble: entry.ble,
                session: entry.session.clone(),
            })
            .collect()
    }

    /// Addresses whose BLE half needs reconnection.
    pub fn needs_reconnect(&self) -> Vec<Address> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(_, entry)| entry.ble == BleConnectionState::Disconnected)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Best-effort BLE reconnection of every disconnected known device.
    ///
    /// Attempts run concurrently; a failure on one device never blocks or
    /// aborts the others.
    pub async fn reconnect_known_devices(&self, client: &ProvisioningClient) {
        let targets = self.needs_reconnect();
        if targets.is_empty() {
            return;
        }
        info!(count = targets.len(), "reconnecting known devices");

        let attempts = targets.into_iter().map(|address| async move {
            if let Err(e) = client.connect(address).await {
                warn!(address = %address, "reconnect failed: {}", e);
            }
        });
        join_all(attempts).await;
    }
}
