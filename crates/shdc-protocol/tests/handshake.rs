//! End-to-end hub/sensor handshake over an in-process network double.
//!
//! Exercises discovery, join, event reporting, and replay rejection
//! together, the way the two engines actually see each other on a LAN.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shdc_common::clock::SystemClock;
use shdc_keystore::KeyStore;
use shdc_protocol::{HubEngine, HubEvent, SensorEngine};
use shdc_transport::{DatagramTransport, DiscoveryPolicy, TransportError};
use tempfile::tempdir;
use tokio::sync::mpsc;

/// A shared in-memory "LAN": delivers unicast to one registered address and
/// broadcast/multicast to every other registered address on the same port.
struct Network {
    peers: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>>>,
}

impl Network {
    fn new() -> Arc<Self> {
        Arc::new(Self { peers: Mutex::new(HashMap::new()) })
    }

    fn register(self: &Arc<Self>, addr: SocketAddr) -> NetTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().insert(addr, tx);
        NetTransport { own_addr: addr, network: self.clone(), inbox: tokio::sync::Mutex::new(rx), sent: Mutex::new(Vec::new()) }
    }
}

struct NetTransport {
    own_addr: SocketAddr,
    network: Arc<Network>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl DatagramTransport for NetTransport {
    async fn send_unicast(&self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        if let Some(tx) = self.network.peers.lock().unwrap().get(&addr) {
            let _ = tx.send((bytes.to_vec(), self.own_addr));
        }
        Ok(())
    }

    async fn send_broadcast(&self, port: u16, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        for (addr, tx) in self.network.peers.lock().unwrap().iter() {
            if *addr != self.own_addr && addr.port() == port {
                let _ = tx.send((bytes.to_vec(), self.own_addr));
            }
        }
        Ok(())
    }

    async fn send_multicast(&self, _group: std::net::Ipv4Addr, port: u16, bytes: &[u8]) -> Result<(), TransportError> {
        self.send_broadcast(port, bytes).await
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut inbox = self.inbox.lock().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| TransportError::RecvFailed(std::io::Error::other("network dropped")))
    }

    fn local_addr(&self) -> Option<IpAddr> {
        Some(self.own_addr.ip())
    }
}

const HUB_ID: u32 = 0x1234_5678;
const SENSOR_ID: u32 = 0x8765_4321;
const HUB_ADDR: &str = "127.0.0.1:56700";
const SENSOR_ADDR: &str = "127.0.0.1:50000";

struct Harness {
    hub: Arc<HubEngine<NetTransport, SystemClock>>,
    sensor: Arc<SensorEngine<NetTransport, SystemClock>>,
    sensor_transport: Arc<NetTransport>,
    _hub_dir: tempfile::TempDir,
    _sensor_dir: tempfile::TempDir,
}

async fn build_harness() -> Harness {
    let network = Network::new();
    let hub_addr: SocketAddr = HUB_ADDR.parse().unwrap();
    let sensor_addr: SocketAddr = SENSOR_ADDR.parse().unwrap();

    let hub_transport = Arc::new(network.register(hub_addr));
    let sensor_transport = Arc::new(network.register(sensor_addr));

    let hub_dir = tempdir().unwrap();
    let hub_keystore = Arc::new(KeyStore::open(hub_dir.path(), HUB_ID).unwrap());
    let hub_identity = hub_keystore.generate_device_keys(false).unwrap();
    let hub = Arc::new(
        HubEngine::new(HUB_ID, hub_identity, "v1.0".to_string(), hub_keystore, hub_transport, Arc::new(SystemClock))
            .unwrap(),
    );

    let sensor_dir = tempdir().unwrap();
    let sensor_keystore = Arc::new(KeyStore::open(sensor_dir.path(), SENSOR_ID).unwrap());
    let sensor_identity = sensor_keystore.generate_device_keys(false).unwrap();
    let sensor = Arc::new(SensorEngine::new(
        "temperature".to_string(),
        sensor_identity,
        sensor_keystore,
        sensor_transport.clone(),
        Arc::new(SystemClock),
    ));

    Harness { hub, sensor, sensor_transport, _hub_dir: hub_dir, _sensor_dir: sensor_dir }
}

fn fast_policy() -> DiscoveryPolicy {
    DiscoveryPolicy { per_attempt_timeout: Duration::from_millis(200), max_attempts: 3, ..DiscoveryPolicy::default() }
}

/// Scenario A (spec §8): a sensor discovers, joins, and the hub observes it.
#[tokio::test]
async fn scenario_a_discovery_and_join() {
    let h = build_harness().await;

    let joined = Arc::new(AtomicBool::new(false));
    let joined_flag = joined.clone();
    h.hub.on_device_joined(move |event| {
        if let HubEvent::DeviceJoined { device_id } = event {
            assert_eq!(*device_id, SENSOR_ID);
            joined_flag.store(true, Ordering::SeqCst);
        }
    });

    let hub_loop = h.hub.clone();
    tokio::spawn(async move {
        let _ = hub_loop.run().await;
    });

    h.sensor.connect(SENSOR_ID, &fast_policy(), None).await.expect("sensor should discover and join the hub");

    assert!(joined.load(Ordering::SeqCst), "hub should have observed the sensor joining");
    assert_eq!(h.sensor.state(), shdc_protocol::SensorState::Connected);
}

/// Scenario B (spec §8): a connected sensor's event report reaches the hub.
#[tokio::test]
async fn scenario_b_event_report_reaches_hub() {
    let h = build_harness().await;

    let received = Arc::new(Mutex::new(None));
    let received_slot = received.clone();
    h.hub.on_sensor_data(move |event| {
        if let HubEvent::SensorData { sender_id, event_type, data } = event {
            *received_slot.lock().unwrap() = Some((*sender_id, *event_type, data.clone()));
        }
    });

    let hub_loop = h.hub.clone();
    tokio::spawn(async move {
        let _ = hub_loop.run().await;
    });

    h.sensor.connect(SENSOR_ID, &fast_policy(), None).await.expect("join should succeed");
    h.sensor.send_event(0x06, b"22.5C".to_vec()).await.expect("event report should send");

    // Give the hub's receive loop a beat to process the datagram.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let got = received.lock().unwrap().clone().expect("hub should have received sensor data");
    assert_eq!(got.0, SENSOR_ID);
    assert_eq!(got.1, 0x06);
    assert_eq!(got.2, b"22.5C".to_vec());
}

/// Scenario C (spec §8): replaying a captured event report is dropped, not
/// re-delivered to the hub's callback.
#[tokio::test]
async fn scenario_c_replayed_event_is_dropped() {
    let h = build_harness().await;

    let delivery_count = Arc::new(Mutex::new(0u32));
    let count_slot = delivery_count.clone();
    h.hub.on_sensor_data(move |_event| {
        *count_slot.lock().unwrap() += 1;
    });

    let hub_loop = h.hub.clone();
    tokio::spawn(async move {
        let _ = hub_loop.run().await;
    });

    h.sensor.connect(SENSOR_ID, &fast_policy(), None).await.expect("join should succeed");
    h.sensor.send_event(0x06, b"22.5C".to_vec()).await.expect("event report should send");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*delivery_count.lock().unwrap(), 1, "first delivery should reach the hub");

    // Capture the exact datagram the sensor just sent and replay it
    // straight at the hub, as an attacker who recorded the wire traffic
    // would (spec §8 Scenario C).
    let captured = {
        let sent = h.sensor_transport.sent.lock().unwrap();
        sent.last().cloned().expect("sensor should have sent an event report")
    };
    let sensor_addr: SocketAddr = SENSOR_ADDR.parse().unwrap();
    h.hub.handle_datagram(&captured, sensor_addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*delivery_count.lock().unwrap(), 1, "replayed datagram must not be re-delivered");
}

/// Scenario D (spec §8): a BROADCAST_COMMAND sent right after join, under
/// broadcast key version 0, decrypts and reaches the sensor's callback —
/// exercising the key bytes the hub hands the sensor during the join
/// handshake itself, not a later KEY_ROTATION.
#[tokio::test]
async fn scenario_d_broadcast_command_decrypts_right_after_join() {
    let h = build_harness().await;

    let hub_loop = h.hub.clone();
    tokio::spawn(async move {
        let _ = hub_loop.run().await;
    });

    h.sensor.connect(SENSOR_ID, &fast_policy(), None).await.expect("join should succeed");

    let received = Arc::new(Mutex::new(None));
    let received_slot = received.clone();
    h.sensor.on_control_message(move |event| {
        if let shdc_protocol::SensorEvent::ControlMessage { command_type, data } = event {
            *received_slot.lock().unwrap() = Some((*command_type, data.clone()));
        }
    });

    let sensor_loop = h.sensor.clone();
    let sensor_transport_loop = h.sensor_transport.clone();
    tokio::spawn(async move {
        loop {
            match sensor_transport_loop.recv().await {
                Ok((bytes, _src)) => sensor_loop.handle_datagram(&bytes).await,
                Err(_) => break,
            }
        }
    });

    let group: std::net::Ipv4Addr = "239.255.0.1".parse().unwrap();
    h.hub.send_broadcast_command(group, SENSOR_ADDR.parse::<SocketAddr>().unwrap().port(), 0x01, vec![]).await.expect(
        "hub should be able to broadcast a command using the key it just bootstrapped into the sensor",
    );

    tokio::time::sleep(Duration::from_millis(50)).await;

    let got = received.lock().unwrap().clone().expect("sensor should have decrypted the broadcast command");
    assert_eq!(got.0, 0x01);
}
