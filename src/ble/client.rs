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

//! BLE provisioning client.
//!
//! Per-device connection state machine plus serialized configuration
//! delivery. Writes to one device go through a per-device async mutex so
//! they complete strictly in issuance order; operations on different
//! devices proceed concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bluer::Address;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::constants::{
    DEVICE_ID_UUID, HEART_RATE_MEASUREMENT_UUID, MODE_UUID, REQUIRED_CONFIG_UUIDS,
    SERVER_ADDR_UUID, TIME_SYNC_UUID, WIFI_PASSWORD_UUID, WIFI_SSID_UUID,
};
use super::measurement::HeartRateMeasurement;
use super::transport::{ConnectError, DeviceIdentity, GattTransport, ScanError, WriteError};

/// Per-device connection state, driven by GATT progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleConnectionState {
    Disconnected,
    Connecting,
    ServicesDiscovering,
    Ready,
    /// Terminal until the next explicit `connect()`: the device is present
    /// but unusable (wrong services, authentication refused).
    Failed,
}

impl Default for BleConnectionState {
    fn default() -> Self {
        BleConnectionState::Disconnected
    }
}

/// Delivery progress for one configuration item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigDeliveryState {
    #[default]
    NotSent,
    WriteInFlight,
    Acked,
    Failed,
}

/// Configuration items the device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigItem {
    Time,
    Mode,
    Id,
    Wifi,
}

/// WiFi handoff parameters, delivered as three sequential writes.
#[derive(Debug, Clone, PartialEq)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    /// `host:port` of the ingestion server the device should stream to.
    pub server_addr: String,
}

/// A configuration value together with its wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Epoch seconds, written as 8 bytes little-endian.
    Time(u64),
    /// Operating mode, single byte.
    Mode(u8),
    /// Device id, raw UTF-8.
    Id(String),
    Wifi(WifiConfig),
}

impl ConfigValue {
    /// Time-sync value for the current wall clock.
    pub fn time_now() -> Self {
        ConfigValue::Time(chrono::Utc::now().timestamp().max(0) as u64)
    }

    pub fn item(&self) -> ConfigItem {
        match self {
            ConfigValue::Time(_) => ConfigItem::Time,
            ConfigValue::Mode(_) => ConfigItem::Mode,
            ConfigValue::Id(_) => ConfigItem::Id,
            ConfigValue::Wifi(_) => ConfigItem::Wifi,
        }
    }

    /// The characteristic writes this value expands into, in order.
    fn encode_writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        match self {
            ConfigValue::Time(epoch) => vec![(TIME_SYNC_UUID, epoch.to_le_bytes().to_vec())],
            ConfigValue::Mode(mode) => vec![(MODE_UUID, vec![*mode])],
            ConfigValue::Id(id) => vec![(DEVICE_ID_UUID, id.clone().into_bytes())],
            ConfigValue::Wifi(wifi) => vec![
                (WIFI_SSID_UUID, wifi.ssid.clone().into_bytes()),
                (WIFI_PASSWORD_UUID, wifi.password.clone().into_bytes()),
                (SERVER_ADDR_UUID, wifi.server_addr.clone().into_bytes()),
            ],
        }
    }
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged {
        address: Address,
        state: BleConnectionState,
    },
    /// Decoded telemetry notification from a PPG-capable device.
    Telemetry {
        address: Address,
        measurement: HeartRateMeasurement,
    },
    ConfigDelivered {
        address: Address,
        item: ConfigItem,
    },
    ConfigFailed {
        address: Address,
        item: ConfigItem,
        reason: String,
    },
}

#[derive(Debug, Default)]
struct DeviceState {
    connection: BleConnectionState,
    delivery: HashMap<ConfigItem, ConfigDeliveryState>,
    write_gate: Option<Arc<tokio::sync::Mutex<()>>>,
    notify_task: Option<JoinHandleWrapper>,
}

/// Aborts the wrapped task when replaced or dropped.
#[derive(Debug)]
struct JoinHandleWrapper(JoinHandle<()>);

impl Drop for JoinHandleWrapper {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The BLE provisioning client.
pub struct ProvisioningClient {
    transport: Arc<dyn GattTransport>,
    event_tx: mpsc::Sender<ClientEvent>,
    connect_timeout: Duration,
    devices: Arc<parking_lot::Mutex<HashMap<Address, DeviceState>>>,
}

impl ProvisioningClient {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        event_tx: mpsc::Sender<ClientEvent>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            event_tx,
            connect_timeout,
            devices: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    /// Current connection state for a device.
    pub fn connection_state(&self, address: Address) -> BleConnectionState {
        self.devices
            .lock()
            .get(&address)
            .map(|d| d.connection)
            .unwrap_or(BleConnectionState::Disconnected)
    }

    /// Delivery progress for one configuration item on a device.
    pub fn delivery_state(&self, address: Address, item: ConfigItem) -> ConfigDeliveryState {
        self.devices
            .lock()
            .get(&address)
            .and_then(|d| d.delivery.get(&item).copied())
            .unwrap_or_default()
    }

    fn set_state(&self, address: Address, state: BleConnectionState) {
        {
            let mut devices = self.devices.lock();
            devices.entry(address).or_default().connection = state;
        }
        let _ = self
            .event_tx
            .try_send(ClientEvent::StateChanged { address, state });
    }

    /// Discover devices for `duration`.
    ///
    /// The returned channel yields each MAC at most once and closes when
    /// the scan window ends; every call starts a fresh result set.
    pub async fn scan(
        &self,
        duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceIdentity>, ScanError> {
        let mut raw = self.transport.scan(duration).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut seen: HashSet<Address> = HashSet::new();
            while let Some(identity) = raw.recv().await {
                if !seen.insert(identity.address) {
                    continue;
                }
                if tx.send(identity).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Connect, discover services, and enable telemetry notifications.
    ///
    /// Idempotent: returns immediately when the device is already Ready.
    /// On timeout, partially established GATT state is released and the
    /// device returns to Disconnected.
    pub async fn connect(&self, address: Address) -> Result<(), ConnectError> {
        if self.connection_state(address) == BleConnectionState::Ready {
            debug!(address = %address, "connect() while ready");
            return Ok(());
        }

        self.set_state(address, BleConnectionState::Connecting);

        match tokio::time::timeout(self.connect_timeout, self.transport.connect(address)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.set_state(address, BleConnectionState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                let _ = self.transport.disconnect(address).await;
                self.set_state(address, BleConnectionState::Disconnected);
                return Err(ConnectError::Timeout);
            }
        }

        self.set_state(address, BleConnectionState::ServicesDiscovering);

        let characteristics = match self.transport.discover_characteristics(address).await {
            Ok(uuids) => uuids,
            Err(e) => {
                let _ = self.transport.disconnect(address).await;
                self.set_state(address, BleConnectionState::Disconnected);
                return Err(e);
            }
        };

        for required in REQUIRED_CONFIG_UUIDS {
            if !characteristics.contains(&required) {
                warn!(address = %address, characteristic = %required, "provisioning characteristic missing");
                let _ = self.transport.disconnect(address).await;
                self.set_state(address, BleConnectionState::Failed);
                return Err(ConnectError::CharacteristicMissing(required));
            }
        }

        // The telemetry characteristic is optional; camera-only devices do
        // not expose the heart-rate service.
        if characteristics.contains(&HEART_RATE_MEASUREMENT_UUID) {
            match self
                .transport
                .subscribe(address, HEART_RATE_MEASUREMENT_UUID)
                .await
            {
                Ok(notifications) => self.spawn_notify_pump(address, notifications),
                Err(e) => warn!(address = %address, "telemetry subscription failed: {}", e),
            }
        }

        {
            let mut devices = self.devices.lock();
            let entry = devices.entry(address).or_default();
            entry
                .write_gate
                .get_or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
        }
        self.set_state(address, BleConnectionState::Ready);
        info!(address = %address, "device ready for configuration");
        Ok(())
    }

    fn spawn_notify_pump(&self, address: Address, mut notifications: mpsc::Receiver<Vec<u8>>) {
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(raw) = notifications.recv().await {
                match HeartRateMeasurement::parse(&raw) {
                    Some(measurement) => {
                        let _ = event_tx
                            .send(ClientEvent::Telemetry {
                                address,
                                measurement,
                            })
                            .await;
                    }
                    None => debug!(address = %address, len = raw.len(), "undecodable telemetry notification"),
                }
            }
        });

        let mut devices = self.devices.lock();
        devices.entry(address).or_default().notify_task = Some(JoinHandleWrapper(task));
    }

    /// Deliver one configuration value.
    ///
    /// Requires the Ready state; fails with [`WriteError::NotReady`]
    /// otherwise, without touching the transport. At most one write is in
    /// flight per device; concurrent callers queue in issuance order.
    pub async fn send_config(
        &self,
        address: Address,
        value: ConfigValue,
    ) -> Result<(), WriteError> {
        let item = value.item();

        let gate = {
            let devices = self.devices.lock();
            let Some(device) = devices.get(&address) else {
                return Err(WriteError::NotReady);
            };
            if device.connection != BleConnectionState::Ready {
                return Err(WriteError::NotReady);
            }
            device.write_gate.clone().ok_or(WriteError::NotReady)?
        };

        let _serialized = gate.lock().await;

        // Re-check after acquiring the gate: the device may have dropped
        // off while we queued behind another write.
        if self.connection_state(address) != BleConnectionState::Ready {
            return Err(WriteError::NotReady);
        }

        self.set_delivery(address, item, ConfigDeliveryState::WriteInFlight);

        for (characteristic, payload) in value.encode_writes() {
            if let Err(e) = self
                .transport
                .write_characteristic(address, characteristic, payload)
                .await
            {
                warn!(address = %address, ?item, "config write failed: {}", e);
                self.set_delivery(address, item, ConfigDeliveryState::Failed);
                let _ = self.event_tx.try_send(ClientEvent::ConfigFailed {
                    address,
                    item,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }

        self.set_delivery(address, item, ConfigDeliveryState::Acked);
        let _ = self
            .event_tx
            .try_send(ClientEvent::ConfigDelivered { address, item });
        debug!(address = %address, ?item, "config delivered");
        Ok(())
    }

    fn set_delivery(&self, address: Address, item: ConfigItem, state: ConfigDeliveryState) {
        let mut devices = self.devices.lock();
        if let Some(device) = devices.get_mut(&address) {
            device.delivery.insert(item, state);
        }
    }

    /// Tear down the GATT link. Always safe; repeated calls are no-ops.
    pub async fn disconnect(&self, address: Address) {
        {
            let mut devices = self.devices.lock();
            if let Some(device) = devices.get_mut(&address) {
                device.notify_task = None;
            }
        }

        if let Err(e) = self.transport.disconnect(address).await {
            debug!(address = %address, "disconnect: {}", e);
        }
        self.set_state(address, BleConnectionState::Disconnected);
    }
}
