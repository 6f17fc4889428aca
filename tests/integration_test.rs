//! Integration tests for the provisioning + ingestion flow.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use thermolink_desktop::ble::{
    Address, BleConnectionState, ClientEvent, ConfigValue, ConnectError, DeviceClass,
    DeviceIdentity, GattTransport, ProvisioningClient, ScanError, WifiConfig, WriteError,
};
use thermolink_desktop::ble::constants::{
    HEART_RATE_MEASUREMENT_UUID, REQUIRED_CONFIG_UUIDS, SERVER_ADDR_UUID, WIFI_PASSWORD_UUID,
    WIFI_SSID_UUID,
};
use thermolink_desktop::registry::DeviceSessionRegistry;
use thermolink_desktop::status_probe::DeviceStatusReport;
use thermolink_desktop::telemetry::{
    classify, DecodedFrame, FixedNetworkProbe, IngestionServer, NullCompositeSink, PortAllocator,
    ServerConfig, ServerLifecycleState, THERMAL_PAYLOAD_LEN, THERMAL_VALUES,
};

const DEVICE: Address = Address::new([0xE8, 0x31, 0xCD, 0x44, 0x55, 0x66]);

/// Transport simulating one well-behaved ThermoLink device.
struct FakeDevice {
    writes: parking_lot::Mutex<Vec<(Uuid, Vec<u8>)>>,
    telemetry_frames: Vec<Vec<u8>>,
}

impl FakeDevice {
    fn new() -> Self {
        Self {
            writes: parking_lot::Mutex::new(Vec::new()),
            // One heart-rate notification: flags 0x00, 72 bpm.
            telemetry_frames: vec![vec![0x00, 72]],
        }
    }
}

#[async_trait]
impl GattTransport for FakeDevice {
    async fn scan(&self, _duration: Duration) -> Result<mpsc::Receiver<DeviceIdentity>, ScanError> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            // The device advertises twice within one scan window.
            for _ in 0..2 {
                let identity = DeviceIdentity {
                    address: DEVICE,
                    name: Some("ThermoLink-4456".into()),
                    class: DeviceClass::ThermalCamera,
                };
                if tx.send(identity).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn connect(&self, _address: Address) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn discover_characteristics(&self, _address: Address) -> Result<Vec<Uuid>, ConnectError> {
        let mut uuids = REQUIRED_CONFIG_UUIDS.to_vec();
        uuids.push(HEART_RATE_MEASUREMENT_UUID);
        Ok(uuids)
    }

    async fn write_characteristic(
        &self,
        _address: Address,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), WriteError> {
        self.writes.lock().push((characteristic, payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        _address: Address,
        _characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ConnectError> {
        let (tx, rx) = mpsc::channel(8);
        let frames = self.telemetry_frames.clone();
        tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn disconnect(&self, _address: Address) -> Result<(), ConnectError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_provision_flow_scan_connect_configure() {
    let device = Arc::new(FakeDevice::new());
    let (event_tx, _event_rx) = mpsc::channel(64);
    let client = ProvisioningClient::new(device.clone(), event_tx, Duration::from_secs(5));
    let registry = DeviceSessionRegistry::new();

    // Scan yields the device exactly once despite repeated advertisements.
    let mut scan = client.scan(Duration::from_millis(100)).await.unwrap();
    let mut discovered = Vec::new();
    while let Some(identity) = scan.recv().await {
        discovered.push(identity);
    }
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].class, DeviceClass::ThermalCamera);
    registry.observe_device(discovered.remove(0));

    // Connect and hand over the WiFi credentials + server address.
    client.connect(DEVICE).await.unwrap();
    assert_eq!(client.connection_state(DEVICE), BleConnectionState::Ready);
    registry.set_ble_state(DEVICE, BleConnectionState::Ready);

    client
        .send_config(
            DEVICE,
            ConfigValue::Wifi(WifiConfig {
                ssid: "thermolink-ap".into(),
                password: "correct horse".into(),
                server_addr: "192.168.4.1:8080".into(),
            }),
        )
        .await
        .unwrap();

    let writes = device.writes.lock().clone();
    let uuids: Vec<Uuid> = writes.iter().map(|(u, _)| *u).collect();
    assert_eq!(uuids, vec![WIFI_SSID_UUID, WIFI_PASSWORD_UUID, SERVER_ADDR_UUID]);
    assert_eq!(writes[2].1, b"192.168.4.1:8080".to_vec());

    // The device joins WiFi and reports in over the status channel; its
    // ingestion session can now be matched back to the MAC.
    registry.note_status_report(
        DEVICE,
        &DeviceStatusReport {
            success: true,
            ip_address: "192.168.4.23".into(),
            ssid: "thermolink-ap".into(),
            timestamp: 1_754_000_000,
        },
    );
    let peer = "192.168.4.23:52044".parse().unwrap();
    assert_eq!(registry.match_session_peer(peer), Some(DEVICE));

    // Dropping BLE keeps nothing half-open: the device becomes a
    // reconnect candidate without losing its identity.
    client.disconnect(DEVICE).await;
    registry.set_ble_state(DEVICE, BleConnectionState::Disconnected);
    assert_eq!(registry.needs_reconnect(), vec![DEVICE]);

    registry.reconnect_known_devices(&client).await;
    assert_eq!(client.connection_state(DEVICE), BleConnectionState::Ready);
}

#[tokio::test]
async fn test_ble_events_reach_subscribers() {
    let device = Arc::new(FakeDevice::new());
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let client = ProvisioningClient::new(device, event_tx, Duration::from_secs(5));

    client.connect(DEVICE).await.unwrap();

    let mut saw_ready = false;
    let mut bpm = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while (!saw_ready || bpm.is_none()) && tokio::time::Instant::now() < deadline {
        let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await
        else {
            continue;
        };
        match event {
            ClientEvent::StateChanged {
                state: BleConnectionState::Ready,
                ..
            } => saw_ready = true,
            ClientEvent::Telemetry { measurement, .. } => bpm = Some(measurement.bpm),
            _ => {}
        }
    }

    assert!(saw_ready);
    assert_eq!(bpm, Some(72));
}

#[test]
fn test_uniform_thermal_frame_scenario() {
    // 3072 bytes of 25.0 decode to 768 values of exactly 25.0.
    let mut payload = Vec::with_capacity(THERMAL_PAYLOAD_LEN);
    for _ in 0..THERMAL_VALUES {
        payload.extend_from_slice(&25.0f32.to_le_bytes());
    }

    match classify(payload) {
        DecodedFrame::Thermal(matrix) => {
            assert_eq!(matrix.values().len(), 768);
            assert!(matrix.values().iter().all(|&v| v == 25.0));
        }
        DecodedFrame::Camera(_) => panic!("uniform 3072-byte frame must decode as thermal"),
    }
}

#[tokio::test]
async fn test_port_conflict_yields_fallback() {
    // Simulate another process holding the preferred port.
    let holder = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let preferred = holder.local_addr().unwrap().port();

    let free = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let fallback = free.local_addr().unwrap().port();
    drop(free);

    let allocator = PortAllocator::new(vec![fallback], Duration::ZERO);
    let got = allocator.acquire(preferred).await.unwrap();
    assert_eq!(got, fallback);
}

#[tokio::test]
async fn test_server_lifecycle_end_to_end() {
    let free = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = free.local_addr().unwrap().port();
    drop(free);

    let server = IngestionServer::new(
        ServerConfig {
            fallback_ports: vec![],
            probe_settle: Duration::ZERO,
            shutdown_grace: Duration::from_millis(500),
        },
        Arc::new(FixedNetworkProbe::active(std::net::Ipv4Addr::LOCALHOST)),
        Arc::new(NullCompositeSink),
    );

    let bound = server.start(port).await.unwrap();
    assert_eq!(bound.port(), port);
    assert_eq!(*server.lifecycle().borrow(), ServerLifecycleState::Running);

    // Second start is idempotent: same address, no rebind.
    assert_eq!(server.start(port).await.unwrap(), bound);

    // The advertised address is what a device would be told to stream to.
    assert_eq!(server.statistics().borrow().bound_addr, Some(bound));

    server.stop().await;
    assert_eq!(*server.lifecycle().borrow(), ServerLifecycleState::Stopped);

    // stop() again is a no-op from Stopped.
    server.stop().await;
    assert_eq!(*server.lifecycle().borrow(), ServerLifecycleState::Stopped);
}
