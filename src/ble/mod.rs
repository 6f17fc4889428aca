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

//! BLE provisioning: scanning, GATT connection, and configuration
//! delivery to ThermoLink devices.

pub mod client;
pub mod constants;
pub mod measurement;
pub mod transport;

pub use bluer::Address;
pub use client::{
    BleConnectionState, ClientEvent, ConfigDeliveryState, ConfigItem, ConfigValue,
    ProvisioningClient, WifiConfig,
};
pub use measurement::HeartRateMeasurement;
pub use transport::{
    BluerTransport, ConnectError, DeviceClass, DeviceIdentity, GattTransport, ScanError,
    WriteError,
};
