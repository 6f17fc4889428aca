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

//! ThermoLink Desktop Application

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thermolink_desktop::ble::{BluerTransport, ClientEvent, ProvisioningClient};
use thermolink_desktop::config::Config;
use thermolink_desktop::registry::{DeviceSessionRegistry, SessionLink};
use thermolink_desktop::telemetry::{
    FixedNetworkProbe, HostNetworkProbe, IngestionServer, NetworkProbe, NullCompositeSink,
    ReconnectSupervisor, ServerLifecycleState, SessionEvent,
};

/// Interval between best-effort BLE reconnect sweeps.
const RECONNECT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thermolink_desktop=info".parse().unwrap()),
        )
        .init();

    info!(
        "Starting ThermoLink Desktop v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Construct the ingestion server and its supervisor
    let probe: Arc<dyn NetworkProbe> = if std::env::var_os("THERMOLINK_ANY_INTERFACE").is_some() {
        // Escape hatch for development hosts without an AP interface.
        Arc::new(FixedNetworkProbe::active(std::net::Ipv4Addr::LOCALHOST))
    } else {
        Arc::new(HostNetworkProbe::new())
    };
    let server = Arc::new(IngestionServer::new(
        config.server_config(),
        probe,
        Arc::new(NullCompositeSink),
    ));
    let _supervisor = ReconnectSupervisor::spawn(
        server.clone(),
        server.supervision(),
        server.lifecycle(),
        config.restart_policy(),
    );

    let registry = Arc::new(DeviceSessionRegistry::new());

    // Initialize the BLE client; the server still runs without Bluetooth.
    let (ble_event_tx, mut ble_event_rx) = tokio::sync::mpsc::channel::<ClientEvent>(32);
    let client = match BluerTransport::new().await {
        Ok(transport) => {
            let client = Arc::new(ProvisioningClient::new(
                Arc::new(transport),
                ble_event_tx,
                config.connect_timeout(),
            ));
            info!("BLE provisioning client initialized");
            Some(client)
        }
        Err(e) => {
            warn!("Bluetooth unavailable, running ingestion only: {}", e);
            None
        }
    };

    // Handle BLE client events
    let registry_ble = registry.clone();
    tokio::spawn(async move {
        while let Some(event) = ble_event_rx.recv().await {
            match event {
                ClientEvent::StateChanged { address, state } => {
                    info!("BLE {}: {:?}", address, state);
                    registry_ble.set_ble_state(address, state);
                }
                ClientEvent::Telemetry {
                    address,
                    measurement,
                } => {
                    info!("PPG {}: {} bpm", address, measurement.bpm);
                }
                ClientEvent::ConfigDelivered { address, item } => {
                    info!("Config {:?} delivered to {}", item, address);
                }
                ClientEvent::ConfigFailed {
                    address,
                    item,
                    reason,
                } => {
                    error!("Config {:?} to {} failed: {}", item, address, reason);
                }
            }
        }
    });

    // Link opening/closing ingestion sessions to known devices
    let registry_sessions = registry.clone();
    let mut session_events = server.session_events();
    tokio::spawn(async move {
        loop {
            match session_events.recv().await {
                Ok(SessionEvent::Opened { id, peer }) => {
                    if let Some(address) = registry_sessions.match_session_peer(peer) {
                        registry_sessions.attach_session(
                            address,
                            SessionLink {
                                session_id: id,
                                peer,
                            },
                        );
                    }
                }
                Ok(SessionEvent::Closed { id, .. }) => {
                    registry_sessions.detach_session(id);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("session event stream lagged by {}", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Surface lifecycle transitions in the log
    let mut lifecycle = server.lifecycle();
    tokio::spawn(async move {
        while lifecycle.changed().await.is_ok() {
            let state = lifecycle.borrow_and_update().clone();
            match &state {
                ServerLifecycleState::Error(reason) => error!("server error: {}", reason),
                ServerLifecycleState::HotspotInactive => {
                    warn!("hotspot inactive; start the AP and restart the server")
                }
                other => info!("server state: {:?}", other),
            }
        }
    });

    // Start ingesting
    match server.start(config.server.preferred_port).await {
        Ok(addr) => info!("Ingestion server listening on {}", addr),
        Err(e) => error!("Server start failed: {}", e),
    }

    // Periodic BLE reconnect sweep until shutdown
    let mut sweep = tokio::time::interval(RECONNECT_SWEEP_INTERVAL);
    sweep.tick().await;
    loop {
        tokio::select! {
            _ = sweep.tick() => {
                if let Some(client) = client.as_ref() {
                    registry.reconnect_known_devices(client).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    server.stop().await;
    info!("ThermoLink Desktop stopped");
    Ok(())
}
