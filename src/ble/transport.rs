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

//! GATT transport abstraction and its BlueZ implementation.
//!
//! The provisioning state machine talks to a [`GattTransport`] rather
//! than BlueZ directly so it can be exercised against an in-memory
//! transport in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, Address};
use futures::{pin_mut, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::constants::{HEART_RATE_SERVICE_UUID, PROVISIONING_SERVICE_UUID};

/// Coarse device kind, derived from advertised service UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    PpgSensor,
    ThermalCamera,
    Unknown,
}

impl DeviceClass {
    /// Classify from the advertised service UUID set.
    pub fn from_service_uuids<'a>(uuids: impl IntoIterator<Item = &'a Uuid>) -> Self {
        let mut class = DeviceClass::Unknown;
        for uuid in uuids {
            if *uuid == PROVISIONING_SERVICE_UUID {
                return DeviceClass::ThermalCamera;
            }
            if *uuid == HEART_RATE_SERVICE_UUID {
                class = DeviceClass::PpgSensor;
            }
        }
        class
    }
}

/// A device observed during scanning. Immutable once created.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub address: Address,
    pub name: Option<String>,
    pub class: DeviceClass,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("scan failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("device not found")]
    DeviceNotFound,

    #[error("connection attempt timed out")]
    Timeout,

    #[error("device does not expose the provisioning service")]
    ServiceMissing,

    #[error("required characteristic {0} missing")]
    CharacteristicMissing(Uuid),

    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),

    #[error("GATT failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    /// The device is not in the Ready state; nothing was written.
    #[error("device is not ready for configuration writes")]
    NotReady,

    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),

    #[error("GATT write failed: {0}")]
    Transport(String),
}

/// Low-level GATT operations against one adapter.
///
/// Implementations report failures as typed errors and never retry
/// internally; retry policy belongs to the caller.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Discover devices for `duration`. The receiver yields raw
    /// observations (duplicates possible) and closes at the deadline.
    async fn scan(&self, duration: Duration) -> Result<mpsc::Receiver<DeviceIdentity>, ScanError>;

    /// Establish the GATT connection.
    async fn connect(&self, address: Address) -> Result<(), ConnectError>;

    /// Enumerate all characteristic UUIDs exposed by the device.
    async fn discover_characteristics(&self, address: Address) -> Result<Vec<Uuid>, ConnectError>;

    /// Write a characteristic value; completion of the future is the
    /// write acknowledgment.
    async fn write_characteristic(
        &self,
        address: Address,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), WriteError>;

    /// Enable notifications on a characteristic and stream its values.
    async fn subscribe(
        &self,
        address: Address,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectError>;

    /// Tear down the GATT link. Must be safe when already disconnected.
    async fn disconnect(&self, address: Address) -> Result<(), ConnectError>;
}

/// BlueZ-backed transport.
pub struct BluerTransport {
    adapter: Adapter,
    // Characteristic proxies resolved during discovery, reused for writes
    // and subscriptions.
    characteristics: parking_lot::Mutex<HashMap<(Address, Uuid), bluer::gatt::remote::Characteristic>>,
}

impl BluerTransport {
    /// Connect to the BlueZ session and power the default adapter on.
    pub async fn new() -> Result<Self, ScanError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(e.to_string()))?;
        info!("BlueZ session created");

        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(e.to_string()))?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter
            .is_powered()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(e.to_string()))?
        {
            info!("Powering on Bluetooth adapter...");
            adapter
                .set_powered(true)
                .await
                .map_err(|e| ScanError::AdapterUnavailable(e.to_string()))?;
        }

        Ok(Self {
            adapter,
            characteristics: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    fn cached_characteristic(
        &self,
        address: Address,
        characteristic: Uuid,
    ) -> Option<bluer::gatt::remote::Characteristic> {
        self.characteristics
            .lock()
            .get(&(address, characteristic))
            .cloned()
    }
}

fn map_connect_err(e: bluer::Error) -> ConnectError {
    use bluer::ErrorKind;
    match e.kind {
        ErrorKind::NotFound => ConnectError::DeviceNotFound,
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
            ConnectError::PermissionDenied(e.to_string())
        }
        _ => ConnectError::Transport(e.to_string()),
    }
}

fn map_write_err(e: bluer::Error) -> WriteError {
    use bluer::ErrorKind;
    match e.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
            WriteError::PermissionDenied(e.to_string())
        }
        _ => WriteError::Transport(e.to_string()),
    }
}

#[async_trait]
impl GattTransport for BluerTransport {
    async fn scan(&self, duration: Duration) -> Result<mpsc::Receiver<DeviceIdentity>, ScanError> {
        let discover = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| ScanError::Transport(e.to_string()))?;
        let adapter = self.adapter.clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            pin_mut!(discover);
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = discover.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            let Ok(device) = adapter.device(address) else { continue };
                            let name = device.name().await.ok().flatten();
                            let uuids = device.uuids().await.ok().flatten().unwrap_or_default();
                            let identity = DeviceIdentity {
                                address,
                                name,
                                class: DeviceClass::from_service_uuids(uuids.iter()),
                            };
                            debug!(address = %address, "discovered device");
                            if tx.send(identity).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!("scan window closed");
        });

        Ok(rx)
    }

    async fn connect(&self, address: Address) -> Result<(), ConnectError> {
        let device = self.adapter.device(address).map_err(map_connect_err)?;
        if device.is_connected().await.map_err(map_connect_err)? {
            debug!(address = %address, "already connected");
            return Ok(());
        }
        device.connect().await.map_err(map_connect_err)?;
        info!(address = %address, "GATT connected");
        Ok(())
    }

    async fn discover_characteristics(&self, address: Address) -> Result<Vec<Uuid>, ConnectError> {
        let device = self.adapter.device(address).map_err(map_connect_err)?;
        let mut found = Vec::new();

        for service in device.services().await.map_err(map_connect_err)? {
            for characteristic in service.characteristics().await.map_err(map_connect_err)? {
                let uuid = characteristic.uuid().await.map_err(map_connect_err)?;
                self.characteristics
                    .lock()
                    .insert((address, uuid), characteristic);
                found.push(uuid);
            }
        }

        debug!(address = %address, count = found.len(), "characteristics discovered");
        Ok(found)
    }

    async fn write_characteristic(
        &self,
        address: Address,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), WriteError> {
        let Some(proxy) = self.cached_characteristic(address, characteristic) else {
            return Err(WriteError::Transport(format!(
                "characteristic {characteristic} not discovered"
            )));
        };

        // Write-with-response: the await resolves on the peripheral's ack.
        proxy
            .write_ext(
                &payload,
                &bluer::gatt::remote::CharacteristicWriteRequest {
                    op_type: bluer::gatt::WriteOp::Request,
                    ..Default::default()
                },
            )
            .await
            .map_err(map_write_err)
    }

    async fn subscribe(
        &self,
        address: Address,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectError> {
        let Some(proxy) = self.cached_characteristic(address, characteristic) else {
            return Err(ConnectError::CharacteristicMissing(characteristic));
        };

        let stream = proxy.notify().await.map_err(map_connect_err)?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            pin_mut!(stream);
            while let Some(value) = stream.next().await {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            debug!("notification stream ended");
        });

        Ok(rx)
    }

    async fn disconnect(&self, address: Address) -> Result<(), ConnectError> {
        self.characteristics
            .lock()
            .retain(|(addr, _), _| *addr != address);

        let device = self.adapter.device(address).map_err(map_connect_err)?;
        match device.disconnect().await {
            Ok(()) => {
                info!(address = %address, "GATT disconnected");
                Ok(())
            }
            Err(e) => {
                warn!(address = %address, "disconnect: {}", e);
                Err(map_connect_err(e))
            }
        }
    }
}
