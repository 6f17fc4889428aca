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

//! Out-of-band device status polling.
//!
//! After the BLE/WiFi handoff the device exposes a tiny HTTP endpoint
//! reporting its network state. This is a fallback channel only: one
//! short-lived GET against an embedded server, parsed strictly, spoken
//! directly over a TCP stream.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Status JSON the device serves at `/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatusReport {
    pub success: bool,
    pub ip_address: String,
    pub ssid: String,
    /// Device-local epoch seconds.
    pub timestamp: i64,
}

impl DeviceStatusReport {
    /// The device's reported clock, when it is a valid epoch timestamp.
    pub fn reported_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
    }
}

#[derive(Debug, Error)]
pub enum StatusProbeError {
    #[error("status request timed out")]
    Timeout,

    #[error("status request failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("device returned HTTP status {0}")]
    HttpStatus(u16),

    #[error("malformed HTTP response")]
    MalformedResponse,

    #[error("malformed status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Polls a device's HTTP status endpoint.
pub struct StatusProbe {
    timeout: Duration,
}

impl StatusProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Fetch `/status` from the device.
    pub async fn fetch(&self, addr: SocketAddr) -> Result<DeviceStatusReport, StatusProbeError> {
        let response = tokio::time::timeout(self.timeout, self.request(addr))
            .await
            .map_err(|_| StatusProbeError::Timeout)??;
        parse_status_response(&response)
    }

    async fn request(&self, addr: SocketAddr) -> Result<Vec<u8>, StatusProbeError> {
        let mut stream = TcpStream::connect(addr).await?;
        let request = format!(
            "GET /status HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
            addr
        );
        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::with_capacity(512);
        stream.read_to_end(&mut response).await?;
        debug!(addr = %addr, bytes = response.len(), "status response received");
        Ok(response)
    }
}

impl Default for StatusProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

/// Parse a raw HTTP/1.x response into a status report.
fn parse_status_response(raw: &[u8]) -> Result<DeviceStatusReport, StatusProbeError> {
    let text = std::str::from_utf8(raw).map_err(|_| StatusProbeError::MalformedResponse)?;
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or(StatusProbeError::MalformedResponse)?;

    let status_line = head.lines().next().ok_or(StatusProbeError::MalformedResponse)?;
    let code: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or(StatusProbeError::MalformedResponse)?;
    if code != 200 {
        return Err(StatusProbeError::HttpStatus(code));
    }

    Ok(serde_json::from_str(body.trim())?)
}
