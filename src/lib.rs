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

//! ThermoLink Desktop core.
//!
//! Two halves of one device lifecycle:
//!
//! - [`ble`] provisions the ESP32 device over GATT (time, mode, id, WiFi
//!   credentials and the ingestion server address) and subscribes to its
//!   telemetry notifications.
//! - [`telemetry`] hosts the WebSocket server the device streams camera
//!   frames and thermal matrices to once it joins the host's network.
//!
//! [`registry`] keeps the two halves of each physical device associated
//! by MAC, and [`status_probe`] polls the device's out-of-band HTTP
//! status endpoint after the WiFi handoff.

pub mod ble;
pub mod config;
pub mod registry;
pub mod status_probe;
pub mod telemetry;

pub use config::Config;
pub use registry::{DeviceSessionRegistry, DeviceSnapshot, SessionLink};
pub use status_probe::{DeviceStatusReport, StatusProbe, StatusProbeError};
