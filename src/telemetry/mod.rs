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

//! Telemetry ingestion: frame decoding, the WebSocket server, port
//! allocation, and restart supervision.

pub mod decoder;
pub mod netwatch;
pub mod ports;
pub mod server;
pub mod session;
pub mod supervisor;

pub use decoder::{classify, DecodedFrame, ThermalMatrix, THERMAL_COLS, THERMAL_PAYLOAD_LEN, THERMAL_ROWS, THERMAL_VALUES};
pub use netwatch::{FixedNetworkProbe, HostNetworkProbe, NetProbeError, NetworkProbe};
pub use ports::{PortAllocator, PortError, DEFAULT_FALLBACK_PORTS};
pub use server::{IngestionServer, ServerConfig, ServerLifecycleState, StartError};
pub use session::{
    CompositeSink, ConnectionStatistics, IngestionSession, NullCompositeSink, SessionEvent,
    SessionSnapshot, TelemetryArtifact,
};
pub use supervisor::{ReconnectSupervisor, RestartPolicy, RestartTarget, SupervisionState};
