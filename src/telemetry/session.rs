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

//! Per-connection ingestion sessions and rolling server statistics.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use super::decoder::ThermalMatrix;

/// One live WebSocket connection from a device.
///
/// Camera frames and thermal matrices arrive on independent cadences with
/// no pairing guarantee from the wire; the two slots update independently
/// and each holds the latest value seen.
#[derive(Debug)]
pub struct IngestionSession {
    id: u64,
    peer: SocketAddr,
    received: u64,
    camera: Option<Arc<Vec<u8>>>,
    thermal: Option<Arc<ThermalMatrix>>,
}

impl IngestionSession {
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            received: 0,
            camera: None,
            thermal: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Messages received on this session so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Record a camera frame, replacing any previous one.
    pub fn note_camera(&mut self, frame: Arc<Vec<u8>>) {
        self.received += 1;
        self.camera = Some(frame);
    }

    /// Record a thermal matrix, replacing any previous one.
    pub fn note_thermal(&mut self, matrix: Arc<ThermalMatrix>) {
        self.received += 1;
        self.thermal = Some(matrix);
    }

    /// Latest-value view of the session for composite recomputation.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            peer: self.peer,
            received: self.received,
            camera: self.camera.clone(),
            thermal: self.thermal.clone(),
        }
    }
}

/// Cheap clone of a session's current state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: u64,
    pub peer: SocketAddr,
    pub received: u64,
    pub camera: Option<Arc<Vec<u8>>>,
    pub thermal: Option<Arc<ThermalMatrix>>,
}

/// Rolling connection statistics for a running server.
///
/// Counters are cumulative and reset only when the server (re)starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStatistics {
    pub clients: usize,
    pub messages_received: u64,
    pub bound_addr: Option<SocketAddr>,
}

/// A decoded artifact republished to subscribers.
#[derive(Debug, Clone)]
pub enum TelemetryArtifact {
    CameraFrame { session: u64, data: Arc<Vec<u8>> },
    Thermal { session: u64, matrix: Arc<ThermalMatrix> },
}

/// Session lifecycle notifications, used to correlate a connection with
/// the physical device it came from.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened { id: u64, peer: SocketAddr },
    Closed { id: u64, peer: SocketAddr },
}

/// Collaborator that combines the latest camera frame and thermal matrix
/// into the display composite. Invoked eagerly whenever either half of a
/// session updates; the actual image transform lives outside this crate.
pub trait CompositeSink: Send + Sync {
    fn recompose(&self, snapshot: &SessionSnapshot);
}

/// Sink that only logs; used until a renderer is attached.
pub struct NullCompositeSink;

impl CompositeSink for NullCompositeSink {
    fn recompose(&self, snapshot: &SessionSnapshot) {
        debug!(
            session = snapshot.id,
            camera = snapshot.camera.is_some(),
            thermal = snapshot.thermal.is_some(),
            "composite recompute"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::decoder::{ThermalMatrix, THERMAL_PAYLOAD_LEN};

    fn peer(port: u16) -> SocketAddr {
        format!("192.168.4.17:{port}").parse().unwrap()
    }

    fn matrix() -> Arc<ThermalMatrix> {
        Arc::new(ThermalMatrix::from_le_bytes(&vec![0u8; THERMAL_PAYLOAD_LEN]).unwrap())
    }

    #[test]
    fn test_slots_update_independently() {
        let mut session = IngestionSession::new(1, peer(50000));
        assert!(session.snapshot().camera.is_none());
        assert!(session.snapshot().thermal.is_none());

        session.note_thermal(matrix());
        let snap = session.snapshot();
        assert!(snap.camera.is_none());
        assert!(snap.thermal.is_some());
        assert_eq!(snap.received, 1);

        session.note_camera(Arc::new(vec![1, 2, 3]));
        let snap = session.snapshot();
        assert!(snap.camera.is_some());
        assert!(snap.thermal.is_some());
        assert_eq!(snap.received, 2);
    }

    #[test]
    fn test_latest_write_wins() {
        let mut session = IngestionSession::new(2, peer(50001));
        session.note_camera(Arc::new(vec![1]));
        session.note_camera(Arc::new(vec![2]));

        let snap = session.snapshot();
        assert_eq!(snap.camera.as_deref(), Some(&vec![2]));
        assert_eq!(snap.received, 2);
    }

    #[test]
    fn test_sessions_do_not_share_counters() {
        let mut a = IngestionSession::new(1, peer(50002));
        let mut b = IngestionSession::new(2, peer(50003));

        a.note_camera(Arc::new(vec![0]));
        a.note_camera(Arc::new(vec![0]));
        b.note_thermal(matrix());

        assert_eq!(a.received(), 2);
        assert_eq!(b.received(), 1);

        drop(a);
        assert_eq!(b.received(), 1);
    }
}
