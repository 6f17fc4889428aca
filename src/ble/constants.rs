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

//! BLE service and characteristic UUIDs for the ThermoLink device.

use uuid::Uuid;

/// Standard Heart Rate service (the device's PPG sensor exposes it).
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180D_0000_1000_8000_00805F9B34FB);

/// Standard Heart Rate Measurement characteristic.
/// Properties: Notify
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002A37_0000_1000_8000_00805F9B34FB);

/// ThermoLink provisioning service UUID.
pub const PROVISIONING_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x7d3e0001_52ba_4a1c_9f36_c84d0a6b21e5);

/// Time sync characteristic (8-byte little-endian epoch seconds).
/// Properties: Write
pub const TIME_SYNC_UUID: Uuid = Uuid::from_u128(0x7d3e0002_52ba_4a1c_9f36_c84d0a6b21e5);

/// Operating mode characteristic (single byte).
/// Properties: Write
pub const MODE_UUID: Uuid = Uuid::from_u128(0x7d3e0003_52ba_4a1c_9f36_c84d0a6b21e5);

/// Device id characteristic (UTF-8 string).
/// Properties: Write
pub const DEVICE_ID_UUID: Uuid = Uuid::from_u128(0x7d3e0004_52ba_4a1c_9f36_c84d0a6b21e5);

/// WiFi SSID characteristic (UTF-8 string).
/// Properties: Write
pub const WIFI_SSID_UUID: Uuid = Uuid::from_u128(0x7d3e0005_52ba_4a1c_9f36_c84d0a6b21e5);

/// WiFi password characteristic (UTF-8 string).
/// Properties: Write
pub const WIFI_PASSWORD_UUID: Uuid = Uuid::from_u128(0x7d3e0006_52ba_4a1c_9f36_c84d0a6b21e5);

/// Ingestion server address characteristic (`host:port`, UTF-8).
/// Properties: Write
pub const SERVER_ADDR_UUID: Uuid = Uuid::from_u128(0x7d3e0007_52ba_4a1c_9f36_c84d0a6b21e5);

/// Characteristics a provisionable device must expose.
pub const REQUIRED_CONFIG_UUIDS: [Uuid; 6] = [
    TIME_SYNC_UUID,
    MODE_UUID,
    DEVICE_ID_UUID,
    WIFI_SSID_UUID,
    WIFI_PASSWORD_UUID,
    SERVER_ADDR_UUID,
];
