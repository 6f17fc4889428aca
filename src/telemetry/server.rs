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

//! WebSocket telemetry ingestion server.
//!
//! Owns the TCP listener and one task per device connection. Binary
//! frames are classified by the decoder and republished as artifacts;
//! lifecycle and statistics are published through watch cells so any
//! number of observers can read them without blocking ingestion.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decoder::{classify, DecodedFrame};
use super::netwatch::NetworkProbe;
use super::ports::{PortAllocator, PortError};
use super::session::{
    CompositeSink, ConnectionStatistics, IngestionSession, SessionEvent, TelemetryArtifact,
};
use super::supervisor::SupervisionState;

/// Lifecycle of one server instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerLifecycleState {
    Stopped,
    Starting,
    Running,
    /// The AP/hotspot interface is not active; the device cannot reach us.
    HotspotInactive,
    /// The listener died or could not be created; the supervisor may
    /// attempt a restart.
    Error(String),
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("hotspot/AP interface is not active")]
    HotspotInactive,

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("listener bind failed: {0}")]
    Bind(std::io::Error),
}

/// Server tuning knobs, normally taken from the config file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub fallback_ports: Vec<u16>,
    pub probe_settle: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fallback_ports: super::ports::DEFAULT_FALLBACK_PORTS.to_vec(),
            probe_settle: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

struct Runtime {
    bound: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    cfg: ServerConfig,
    probe: Arc<dyn NetworkProbe>,
    composite: Arc<dyn CompositeSink>,
    lifecycle_tx: watch::Sender<ServerLifecycleState>,
    stats_tx: watch::Sender<ConnectionStatistics>,
    artifacts_tx: broadcast::Sender<TelemetryArtifact>,
    session_events_tx: broadcast::Sender<SessionEvent>,
    next_session_id: AtomicU64,
}

/// The WebSocket ingestion server.
pub struct IngestionServer {
    shared: Arc<Shared>,
    supervision: Arc<SupervisionState>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
    last_port: parking_lot::Mutex<Option<u16>>,
}

impl IngestionServer {
    pub fn new(
        cfg: ServerConfig,
        probe: Arc<dyn NetworkProbe>,
        composite: Arc<dyn CompositeSink>,
    ) -> Self {
        let (lifecycle_tx, _) = watch::channel(ServerLifecycleState::Stopped);
        let (stats_tx, _) = watch::channel(ConnectionStatistics::default());
        // Buffer sized for roughly one second of combined camera + thermal
        // output; lagging subscribers drop frames, never block ingestion.
        let (artifacts_tx, _) = broadcast::channel(64);
        let (session_events_tx, _) = broadcast::channel(16);

        Self {
            shared: Arc::new(Shared {
                cfg,
                probe,
                composite,
                lifecycle_tx,
                stats_tx,
                artifacts_tx,
                session_events_tx,
                next_session_id: AtomicU64::new(1),
            }),
            supervision: Arc::new(SupervisionState::default()),
            runtime: tokio::sync::Mutex::new(None),
            last_port: parking_lot::Mutex::new(None),
        }
    }

    /// Observe lifecycle transitions.
    pub fn lifecycle(&self) -> watch::Receiver<ServerLifecycleState> {
        self.shared.lifecycle_tx.subscribe()
    }

    /// Observe connection statistics.
    pub fn statistics(&self) -> watch::Receiver<ConnectionStatistics> {
        self.shared.stats_tx.subscribe()
    }

    /// Subscribe to the decoded-artifact stream.
    pub fn artifacts(&self) -> broadcast::Receiver<TelemetryArtifact> {
        self.shared.artifacts_tx.subscribe()
    }

    /// Subscribe to session open/close notifications.
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.session_events_tx.subscribe()
    }

    /// Restart-attempt bookkeeping shared with the supervisor.
    pub fn supervision(&self) -> Arc<SupervisionState> {
        self.supervision.clone()
    }

    /// Start accepting device connections.
    ///
    /// Idempotent: calling while already Running returns the bound address
    /// without rebinding. A manual start always resets the supervisor's
    /// attempt counter.
    pub async fn start(&self, preferred_port: u16) -> Result<SocketAddr, StartError> {
        self.supervision.reset();
        self.start_inner(preferred_port).await
    }

    /// Re-invoke startup with the last requested port, for the supervisor.
    /// Does not touch the attempt counter.
    pub(crate) async fn restart_last(&self) -> Result<SocketAddr, StartError> {
        let last = *self.last_port.lock();
        match last {
            Some(port) => self.start_inner(port).await,
            None => Err(StartError::Port(PortError::AllPortsExhausted)),
        }
    }

    async fn start_inner(&self, preferred_port: u16) -> Result<SocketAddr, StartError> {
        let mut runtime = self.runtime.lock().await;

        if let Some(rt) = runtime.as_ref() {
            let running =
                *self.shared.lifecycle_tx.borrow() == ServerLifecycleState::Running;
            if running && !rt.handle.is_finished() {
                debug!(addr = %rt.bound, "start() while running, returning bound address");
                return Ok(rt.bound);
            }
        }

        *self.last_port.lock() = Some(preferred_port);
        self.shared
            .lifecycle_tx
            .send_replace(ServerLifecycleState::Starting);

        let host = match self.shared.probe.active_host_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("refusing to start: {}", e);
                self.shared
                    .lifecycle_tx
                    .send_replace(ServerLifecycleState::HotspotInactive);
                return Err(StartError::HotspotInactive);
            }
        };

        let allocator = PortAllocator::new(
            self.shared.cfg.fallback_ports.clone(),
            self.shared.cfg.probe_settle,
        );
        let port = match allocator.acquire(preferred_port).await {
            Ok(port) => port,
            Err(e) => {
                self.shared
                    .lifecycle_tx
                    .send_replace(ServerLifecycleState::Error(e.to_string()));
                return Err(e.into());
            }
        };

        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shared
                    .lifecycle_tx
                    .send_replace(ServerLifecycleState::Error(e.to_string()));
                return Err(StartError::Bind(e));
            }
        };

        let bound = SocketAddr::new(IpAddr::V4(host), port);
        let cancel = CancellationToken::new();

        let app = Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.shared.clone());

        let shared = self.shared.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(token.cancelled_owned());

            if let Err(e) = serve.await {
                error!("ingestion listener died: {}", e);
                shared
                    .lifecycle_tx
                    .send_replace(ServerLifecycleState::Error(e.to_string()));
            }
        });

        self.shared.stats_tx.send_replace(ConnectionStatistics {
            clients: 0,
            messages_received: 0,
            bound_addr: Some(bound),
        });
        self.shared
            .lifecycle_tx
            .send_replace(ServerLifecycleState::Running);
        *runtime = Some(Runtime {
            bound,
            cancel,
            handle,
        });

        info!(addr = %bound, "ingestion server running");
        Ok(bound)
    }

    /// Stop the server with the configured grace period.
    pub async fn stop(&self) {
        self.stop_with_grace(self.shared.cfg.shutdown_grace).await
    }

    /// Stop the server, closing all sessions.
    ///
    /// Connections get `grace` to shut down cleanly before the accept task
    /// is aborted. Safe to call from any state; a no-op when not running.
    pub async fn stop_with_grace(&self, grace: Duration) {
        let mut runtime = self.runtime.lock().await;
        let Some(rt) = runtime.take() else {
            debug!("stop() with no active listener, nothing to do");
            return;
        };

        rt.cancel.cancel();
        let mut handle = rt.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("graceful shutdown exceeded grace period, aborting listener");
            handle.abort();
        }

        let was_live = matches!(
            *self.shared.lifecycle_tx.borrow(),
            ServerLifecycleState::Running | ServerLifecycleState::Starting
        );
        if was_live {
            self.shared
                .lifecycle_tx
                .send_replace(ServerLifecycleState::Stopped);
        }

        info!("ingestion server stopped");
    }

    /// Currently bound address, if running.
    pub async fn bound_addr(&self) -> Option<SocketAddr> {
        self.runtime.lock().await.as_ref().map(|rt| rt.bound)
    }
}

#[async_trait::async_trait]
impl super::supervisor::RestartTarget for IngestionServer {
    async fn restart(&self) -> bool {
        self.restart_last().await.is_ok()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(shared): State<Arc<Shared>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, shared))
}

/// One task per device connection; a stalled client never blocks others.
async fn handle_socket(mut socket: WebSocket, peer: SocketAddr, shared: Arc<Shared>) {
    let id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
    let mut session = IngestionSession::new(id, peer);

    info!(session = id, peer = %peer, "device connected");
    shared.stats_tx.send_modify(|s| s.clients += 1);
    let _ = shared
        .session_events_tx
        .send(SessionEvent::Opened { id, peer });

    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Binary(payload)) => {
                shared.stats_tx.send_modify(|s| s.messages_received += 1);

                match classify(payload) {
                    DecodedFrame::Thermal(matrix) => {
                        let matrix = Arc::new(matrix);
                        session.note_thermal(matrix.clone());
                        let _ = shared.artifacts_tx.send(TelemetryArtifact::Thermal {
                            session: id,
                            matrix,
                        });
                    }
                    DecodedFrame::Camera(data) => {
                        let data = Arc::new(data);
                        session.note_camera(data.clone());
                        let _ = shared.artifacts_tx.send(TelemetryArtifact::CameraFrame {
                            session: id,
                            data,
                        });
                    }
                }

                shared.composite.recompose(&session.snapshot());
            }
            Ok(Message::Text(text)) => {
                // No text semantics are defined; acknowledge receipt only.
                debug!(session = id, "text frame: {}", text.trim());
                if socket.send(Message::Text("ack".to_string())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(session = id, "close frame received");
                break;
            }
            Err(e) => {
                // Frame-level failure is scoped to this session; drop the
                // connection and keep the listener alive.
                warn!(session = id, "socket error: {}", e);
                break;
            }
        }
    }

    shared.stats_tx.send_modify(|s| s.clients = s.clients.saturating_sub(1));
    let _ = shared
        .session_events_tx
        .send(SessionEvent::Closed { id, peer });
    info!(
        session = id,
        received = session.received(),
        "device disconnected"
    );
}
