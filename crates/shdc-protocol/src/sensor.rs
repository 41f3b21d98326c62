//! Sensor-role protocol engine (spec §4.6 sensor state machine).
//!
//! `DISCONNECTED → DISCOVERING → JOINING → CONNECTED`, with `ERROR`
//! re-entering `DISCOVERING` after a backoff on any cryptographic or
//! parsing failure along the way.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use shdc_codec::{
    BroadcastCommandPayload, EventReportPayload, Header, JoinRequestPayload, JoinResponsePayload,
    KeyRotationPayload, Message, MessageType,
};
use shdc_common::Clock;
use shdc_crypto::{derive_session_key, random_header_nonce, verify, IdentityKeyPair};
use shdc_keystore::KeyStore;
use shdc_replay::ReplayGuard;
use shdc_transport::{DatagramTransport, DiscoveredHub, DiscoveryPolicy, DiscoveryService};
use tracing::{debug, info, warn};

use crate::callbacks::CallbackTable;
use crate::envelope;
use crate::error::EngineError;
use crate::events::SensorEvent;
use crate::session::RotatingSecret;

mod callback_keys {
    pub const CONTROL_MESSAGE: u8 = 0x04; // BROADCAST_COMMAND handling
    pub const HUB_ROTATED_KEYS: u8 = 0x05; // KEY_ROTATION handling
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Disconnected,
    Discovering,
    Joining,
    Connected,
    Error,
}

struct JoinedHub {
    address: SocketAddr,
    public_key: [u8; 32],
    session: RotatingSecret,
    broadcast: RotatingSecret,
    broadcast_version: u8,
}

/// The sensor role's engine: runs discovery, drives the join handshake,
/// sends event reports, and processes broadcast commands and key rotation
/// once connected.
pub struct SensorEngine<T: DatagramTransport, C: Clock> {
    device_id: RwLock<u32>,
    device_type: String,
    identity: IdentityKeyPair,
    keystore: Arc<KeyStore>,
    replay: ReplayGuard,
    transport: Arc<T>,
    clock: Arc<C>,
    discovery: DiscoveryService<T>,
    state: RwLock<SensorState>,
    hub: RwLock<Option<JoinedHub>>,
    callbacks: CallbackTable<SensorEvent>,
}

impl<T: DatagramTransport, C: Clock> SensorEngine<T, C> {
    pub fn new(
        device_type: String,
        identity: IdentityKeyPair,
        keystore: Arc<KeyStore>,
        transport: Arc<T>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            device_id: RwLock::new(shdc_common::constants::UNASSIGNED_DEVICE_ID),
            device_type,
            identity,
            keystore,
            replay: ReplayGuard::new(),
            transport: transport.clone(),
            clock,
            discovery: DiscoveryService::new(transport),
            state: RwLock::new(SensorState::Disconnected),
            hub: RwLock::new(None),
            callbacks: CallbackTable::new(),
        }
    }

    pub fn device_id(&self) -> u32 {
        *self.device_id.read().expect("device id lock poisoned")
    }

    pub fn state(&self) -> SensorState {
        *self.state.read().expect("sensor state lock poisoned")
    }

    /// The broadcast key version currently accepted, if joined (surfaced by
    /// `shdc-sensor status`).
    pub fn broadcast_key_version(&self) -> Option<u8> {
        self.hub.read().expect("joined hub lock poisoned").as_ref().map(|h| h.broadcast_version)
    }

    pub fn on_control_message(&self, handler: impl Fn(&SensorEvent) + Send + Sync + 'static) {
        self.callbacks.register(callback_keys::CONTROL_MESSAGE, handler);
    }

    pub fn on_hub_rotated_keys(&self, handler: impl Fn(&SensorEvent) + Send + Sync + 'static) {
        self.callbacks.register(callback_keys::HUB_ROTATED_KEYS, handler);
    }

    /// Run discovery-with-retry, then JOIN_REQUEST the selected hub (spec
    /// §4.6 DISCONNECTED → DISCOVERING → JOINING → CONNECTED). On any
    /// failure the sensor lands in ERROR and the caller is expected to
    /// retry after a backoff (spec §4.6 "ERROR re-enters DISCOVERING").
    pub async fn connect(
        &self,
        assigned_id: u32,
        policy: &DiscoveryPolicy,
        preferred_hub: Option<SocketAddr>,
    ) -> Result<(), EngineError> {
        *self.device_id.write().expect("device id lock poisoned") = assigned_id;
        *self.state.write().expect("sensor state lock poisoned") = SensorState::Discovering;

        let hub = match self.discover_hub(assigned_id, policy, preferred_hub).await {
            Ok(hub) => hub,
            Err(e) => {
                *self.state.write().expect("sensor state lock poisoned") = SensorState::Error;
                return Err(e);
            }
        };

        *self.state.write().expect("sensor state lock poisoned") = SensorState::Joining;
        match self.join(&hub).await {
            Ok(()) => {
                *self.state.write().expect("sensor state lock poisoned") = SensorState::Connected;
                Ok(())
            }
            Err(e) => {
                *self.state.write().expect("sensor state lock poisoned") = SensorState::Error;
                Err(e)
            }
        }
    }

    /// Run discovery only, without joining (spec §6 `discover` / `--no-auto-join`).
    pub async fn discover(&self, policy: &DiscoveryPolicy) -> Result<Vec<DiscoveredHub>, EngineError> {
        let clock = self.clock.clone();
        let assigned_id = self.device_id();
        self.discovery
            .discover_with_retry(&self.identity, assigned_id, &self.device_type, || clock.now_unix(), policy)
            .await?;
        Ok(self.discovery.all_hubs())
    }

    async fn discover_hub(
        &self,
        assigned_id: u32,
        policy: &DiscoveryPolicy,
        preferred_hub: Option<SocketAddr>,
    ) -> Result<DiscoveredHub, EngineError> {
        let clock = self.clock.clone();
        self.discovery
            .discover_with_retry(&self.identity, assigned_id, &self.device_type, || clock.now_unix(), policy)
            .await?;

        if let Some(addr) = preferred_hub {
            if let Some(hub) = self.discovery.all_hubs().into_iter().find(|h| h.address == addr) {
                return Ok(hub);
            }
        }

        self.discovery
            .best_hub()
            .ok_or(EngineError::InvalidState("discovery exhausted its retry budget with no hub found"))
    }

    async fn join(&self, hub: &DiscoveredHub) -> Result<(), EngineError> {
        let sensor_id = self.device_id();
        let now = self.clock.now_unix();

        let header = Header::new(MessageType::JoinRequest as u8, sensor_id, now as u32, random_header_nonce());
        let payload =
            JoinRequestPayload { public_key: self.identity.public_key_bytes(), device_info: self.device_type.clone() }
                .to_bytes();
        let signature = self.identity.sign(&signed_bytes(&header, &payload));
        let request = Message::new(header, payload, signature);
        self.transport.send_unicast(hub.address, &request.to_bytes()?).await?;

        let (bytes, src) = self.transport.recv().await?;
        let msg = Message::from_bytes(&bytes)?;
        if msg.header.msg_type != MessageType::JoinResponse as u8 {
            return Err(EngineError::InvalidState("expected JOIN_RESPONSE, got a different message type"));
        }
        verify(&hub.public_key, &msg.signed_bytes(), &msg.signature)?;

        let now = self.clock.now_unix();
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        // Mirrors the hub's derivation exactly: shared secret is the
        // sensor's pubkey concatenated with the hub's, ordered (hub id,
        // sensor id) on both ends (spec §4.2, §4.6).
        let mut shared_secret = Vec::with_capacity(64);
        shared_secret.extend_from_slice(&self.identity.public_key_bytes());
        shared_secret.extend_from_slice(&hub.public_key);
        let response_key = derive_session_key(&shared_secret, hub.hub_id, sensor_id)?;

        let plaintext = envelope::open(&[response_key], &msg.header, &msg.payload)?;
        let payload = JoinResponsePayload::from_bytes(&plaintext)?;
        if payload.assigned_id != sensor_id {
            return Err(EngineError::InvalidState("hub assigned a different id than requested"));
        }

        // The broadcast key's bytes never travel inside JOIN_RESPONSE itself
        // (only its version does, spec §4.1); the hub follows up immediately
        // with the real key under the same `response_key`, framed as
        // KEY_ROTATION rather than widening the join wire format.
        let (boot_bytes, _boot_src) = self.transport.recv().await?;
        let boot_msg = Message::from_bytes(&boot_bytes)?;
        if boot_msg.header.msg_type != MessageType::KeyRotation as u8 {
            return Err(EngineError::InvalidState(
                "expected the broadcast-key bootstrap message following JOIN_RESPONSE",
            ));
        }
        verify(&hub.public_key, &boot_msg.signed_bytes(), &boot_msg.signature)?;
        let boot_now = self.clock.now_unix();
        self.replay.check(boot_msg.header.device_id, boot_msg.header.timestamp, boot_msg.header.nonce, boot_now)?;
        let boot_plaintext = envelope::open(&[response_key], &boot_msg.header, &boot_msg.payload)?;
        let broadcast_key = KeyRotationPayload::from_bytes(&boot_plaintext)?.new_key;

        self.keystore.store_session_key(hub.hub_id, &payload.session_key)?;
        self.keystore.store_broadcast_key(payload.broadcast_key_id, &broadcast_key)?;

        *self.hub.write().expect("joined hub lock poisoned") = Some(JoinedHub {
            address: src,
            public_key: hub.public_key,
            session: RotatingSecret::new(payload.session_key),
            broadcast: RotatingSecret::new(broadcast_key),
            broadcast_version: payload.broadcast_key_id,
        });

        info!(hub_id = %format!("{:08X}", hub.hub_id), "joined hub");
        Ok(())
    }

    /// Send an EVENT_REPORT to the joined hub (spec §4.1, §4.6).
    pub async fn send_event(&self, event_type: u8, data: Vec<u8>) -> Result<(), EngineError> {
        if self.state() != SensorState::Connected {
            return Err(EngineError::InvalidState("send_event requires CONNECTED state"));
        }
        let sensor_id = self.device_id();
        let now = self.clock.now_unix();

        let (address, session_key) = {
            let hub = self.hub.read().expect("joined hub lock poisoned");
            let hub = hub.as_ref().ok_or(EngineError::NoSessionKey(sensor_id))?;
            (hub.address, hub.session.current())
        };

        let header = Header::new(MessageType::EventReport as u8, sensor_id, now as u32, random_header_nonce());
        let payload = EventReportPayload { event_type, data }.to_bytes();
        let envelope = envelope::seal(&session_key, &header, &payload)?;
        let signature = self.identity.sign(&signed_bytes(&header, &envelope));
        let msg = Message::new(header, envelope, signature);
        self.transport.send_unicast(address, &msg.to_bytes()?).await?;
        Ok(())
    }

    /// Process one inbound datagram once CONNECTED (BROADCAST_COMMAND and
    /// KEY_ROTATION are the only message types a sensor receives post-join).
    pub async fn handle_datagram(&self, bytes: &[u8]) {
        if let Err(e) = self.dispatch(bytes).await {
            use shdc_common::Classify;
            debug!(kind = %e.kind(), err = %e, "dropping inbound datagram");
        }
    }

    async fn dispatch(&self, bytes: &[u8]) -> Result<(), EngineError> {
        let msg = Message::from_bytes(bytes)?;
        let now = self.clock.now_unix();

        if self.state() != SensorState::Connected {
            let allowed = msg.header.msg_type == MessageType::HubDiscoveryResp as u8
                || msg.header.msg_type == MessageType::JoinResponse as u8;
            if !allowed {
                return Err(EngineError::PreJoinMessageRejected(msg.header.msg_type));
            }
        }

        match MessageType::from_u8(msg.header.msg_type)? {
            MessageType::BroadcastCommand => self.handle_broadcast_command(msg, now),
            MessageType::KeyRotation => self.handle_key_rotation(msg, now),
            _ => Ok(()), // discovery/join traffic is handled by connect(), not this loop
        }
    }

    fn handle_broadcast_command(&self, msg: Message, now: i64) -> Result<(), EngineError> {
        let public_key = {
            let hub = self.hub.read().expect("joined hub lock poisoned");
            hub.as_ref().ok_or(EngineError::NoSessionKey(msg.header.device_id))?.public_key
        };
        verify(&public_key, &msg.signed_bytes(), &msg.signature)?;
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        let candidates = {
            let mut hub = self.hub.write().expect("joined hub lock poisoned");
            let hub = hub.as_mut().ok_or(EngineError::NoSessionKey(msg.header.device_id))?;
            hub.broadcast.candidates(now)
        };
        let plaintext = envelope::open(&candidates, &msg.header, &msg.payload)?;
        let payload = BroadcastCommandPayload::from_bytes(&plaintext)?;

        self.callbacks.dispatch(
            callback_keys::CONTROL_MESSAGE,
            &SensorEvent::ControlMessage { command_type: payload.command_type, data: payload.command_data },
        );
        Ok(())
    }

    /// Disambiguate which context a KEY_ROTATION targets (session vs.
    /// broadcast) by trial decryption, since the wire format carries no
    /// explicit discriminator (see DESIGN.md).
    fn handle_key_rotation(&self, msg: Message, now: i64) -> Result<(), EngineError> {
        let public_key = {
            let hub = self.hub.read().expect("joined hub lock poisoned");
            hub.as_ref().ok_or(EngineError::NoSessionKey(msg.header.device_id))?.public_key
        };
        verify(&public_key, &msg.signed_bytes(), &msg.signature)?;
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        let mut hub = self.hub.write().expect("joined hub lock poisoned");
        let hub = hub.as_mut().ok_or(EngineError::NoSessionKey(msg.header.device_id))?;

        let session_candidates = hub.session.candidates(now);
        if let Ok(plaintext) = envelope::open(&session_candidates, &msg.header, &msg.payload) {
            let payload = KeyRotationPayload::from_bytes(&plaintext)?;
            hub.session.install_rotation(payload.new_key, payload.valid_from as i64, now);
            self.keystore.store_session_key(msg.header.device_id, &payload.new_key)?;
            self.callbacks.dispatch(
                callback_keys::HUB_ROTATED_KEYS,
                &SensorEvent::HubRotatedKeys { valid_from: payload.valid_from as i64 },
            );
            return Ok(());
        }

        let broadcast_candidates = hub.broadcast.candidates(now);
        let plaintext = envelope::open(&broadcast_candidates, &msg.header, &msg.payload)?;
        let payload = KeyRotationPayload::from_bytes(&plaintext)?;
        hub.broadcast.install_rotation(payload.new_key, payload.valid_from as i64, now);
        hub.broadcast_version = hub.broadcast_version.wrapping_add(1);
        self.keystore.store_broadcast_key(hub.broadcast_version, &payload.new_key)?;
        self.callbacks.dispatch(
            callback_keys::HUB_ROTATED_KEYS,
            &SensorEvent::HubRotatedKeys { valid_from: payload.valid_from as i64 },
        );
        Ok(())
    }

    /// Continuous post-join discovery refresh (spec §4.5 continuous mode):
    /// re-run discovery on `interval` with a short per-attempt timeout,
    /// pruning stale hub records. Intended to run as a background task
    /// alongside the main receive loop; returns only on a transport error.
    pub async fn run_continuous_discovery(
        &self,
        interval: Duration,
        per_attempt_timeout: Duration,
    ) -> Result<(), EngineError> {
        let policy = DiscoveryPolicy { per_attempt_timeout, max_attempts: 1, ..DiscoveryPolicy::default() };
        loop {
            tokio::time::sleep(interval).await;
            let now = self.clock.now_unix();
            self.discovery.prune_stale(now);
            if let Err(e) = self.discovery.discover_once(&self.identity, self.device_id(), &self.device_type, now, &policy).await
            {
                warn!(%e, "continuous discovery attempt failed, will retry next interval");
            }
        }
    }
}

fn signed_bytes(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shdc_common::clock::ManualClock;
    use shdc_crypto::{encrypt, random_header_nonce as rnd_nonce};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct LoopbackTransport {
        inbound: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self { inbound: Mutex::new(VecDeque::new()), sent: Mutex::new(Vec::new()) }
        }

        fn push(&self, bytes: Vec<u8>, src: SocketAddr) {
            self.inbound.lock().unwrap().push_back((bytes, src));
        }
    }

    impl DatagramTransport for LoopbackTransport {
        async fn send_unicast(&self, _addr: SocketAddr, bytes: &[u8]) -> Result<(), shdc_transport::TransportError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn send_broadcast(&self, _port: u16, bytes: &[u8]) -> Result<(), shdc_transport::TransportError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn send_multicast(
            &self,
            _group: Ipv4Addr,
            _port: u16,
            bytes: &[u8],
        ) -> Result<(), shdc_transport::TransportError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), shdc_transport::TransportError> {
            loop {
                if let Some(item) = self.inbound.lock().unwrap().pop_front() {
                    return Ok(item);
                }
                tokio::task::yield_now().await;
            }
        }
    }

    fn make_engine() -> (SensorEngine<LoopbackTransport, ManualClock>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let keystore = Arc::new(KeyStore::open(dir.path(), 0x8765_4321).unwrap());
        let identity = keystore.generate_device_keys(false).unwrap();
        let transport = Arc::new(LoopbackTransport::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let engine = SensorEngine::new("motion".into(), identity, keystore, transport, clock);
        (engine, dir)
    }

    #[tokio::test]
    async fn pre_join_event_report_is_rejected() {
        let (engine, _dir) = make_engine();
        let header = Header::new(MessageType::EventReport as u8, 0x8765_4321, 1_700_000_000, rnd_nonce());
        let payload = EventReportPayload { event_type: 1, data: vec![] }.to_bytes();
        let signature = engine.identity.sign(&signed_bytes(&header, &payload));
        let bytes = Message::new(header, payload, signature).to_bytes().unwrap();

        // Not connected; handle_datagram should drop this without panicking.
        engine.handle_datagram(&bytes).await;
        assert_eq!(engine.state(), SensorState::Disconnected);
    }

    #[tokio::test]
    async fn broadcast_command_decrypts_and_emits_control_message() {
        let (engine, _dir) = make_engine();
        *engine.device_id.write().unwrap() = 0x8765_4321;

        let hub_identity = IdentityKeyPair::generate();
        let broadcast_key = [7u8; 32];
        *engine.hub.write().unwrap() = Some(JoinedHub {
            address: "127.0.0.1:56700".parse().unwrap(),
            public_key: hub_identity.public_key_bytes(),
            session: RotatingSecret::new([1u8; 32]),
            broadcast: RotatingSecret::new(broadcast_key),
            broadcast_version: 0,
        });
        *engine.state.write().unwrap() = SensorState::Connected;

        let received = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let received_flag = received.clone();
        engine.on_control_message(move |_| received_flag.store(true, std::sync::atomic::Ordering::SeqCst));

        let header = Header::new(MessageType::BroadcastCommand as u8, 0x1111_1111, 1_700_000_000, rnd_nonce());
        let payload = BroadcastCommandPayload { command_type: 1, command_data: vec![], broadcast_key_id: 0 }.to_bytes();
        let (nonce, ciphertext) = encrypt(&broadcast_key, &payload, &header.to_bytes()).unwrap();
        let mut env = nonce.to_vec();
        env.extend_from_slice(&ciphertext);
        let signature = hub_identity.sign(&signed_bytes(&header, &env));
        let bytes = Message::new(header, env, signature).to_bytes().unwrap();

        engine.handle_datagram(&bytes).await;
        assert!(received.load(std::sync::atomic::Ordering::SeqCst));
    }
}
