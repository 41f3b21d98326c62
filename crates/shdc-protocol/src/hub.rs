//! Hub-role protocol engine (spec §4.6 hub state machine).
//!
//! `STOPPED → STARTING → RUNNING → (STOPPED | ERROR)`. While running, the
//! hub answers discovery, processes joins, accepts event reports, services
//! key rotation, and originates broadcast commands — it never accepts one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use shdc_codec::{
    BroadcastCommandPayload, EventReportPayload, Header, HubDiscoveryRequestPayload,
    HubDiscoveryResponsePayload, JoinRequestPayload, JoinResponsePayload, KeyRotationPayload, Message,
    MessageType,
};
use shdc_common::Clock;
use shdc_crypto::{derive_session_key, random_header_nonce, verify, IdentityKeyPair};
use shdc_keystore::KeyStore;
use shdc_replay::ReplayGuard;
use shdc_transport::DatagramTransport;
use tracing::{debug, info, warn};

use crate::callbacks::CallbackTable;
use crate::envelope;
use crate::error::EngineError;
use crate::events::HubEvent;
use crate::session::RotatingSecret;

/// Message-type-keyed slots the hub's callback table dispatches under.
/// `DEVICE_LEFT`/`STATUS_REQUEST` have no corresponding wire message — they
/// use reserved codes above the protocol's defined range.
mod callback_keys {
    pub const DEVICE_JOINED: u8 = 0x02; // JOIN_REQUEST handling
    pub const SENSOR_DATA: u8 = 0x01; // EVENT_REPORT handling
    pub const DEVICE_LEFT: u8 = 0x80;
    pub const STATUS_REQUEST: u8 = 0x81;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Stopped,
    Starting,
    Running,
    Error,
}

struct SensorRecord {
    address: SocketAddr,
    public_key: [u8; 32],
    session: RotatingSecret,
}

fn highest_broadcast_version(keystore: &KeyStore) -> Option<u8> {
    keystore
        .list_keys()
        .into_iter()
        .filter_map(|info| info.key_id.strip_prefix("broadcast_").map(str::to_string))
        .filter_map(|suffix| u8::from_str_radix(&suffix, 16).ok())
        .max()
}

/// The hub role's engine: owns its key store, replay guard, transport
/// handle, and per-sensor state. Generic over the transport and clock
/// capabilities so tests can swap in deterministic doubles.
pub struct HubEngine<T: DatagramTransport, C: Clock> {
    device_id: u32,
    identity: IdentityKeyPair,
    capabilities: String,
    keystore: Arc<KeyStore>,
    replay: ReplayGuard,
    transport: Arc<T>,
    clock: Arc<C>,
    state: RwLock<HubState>,
    sensors: RwLock<HashMap<u32, SensorRecord>>,
    broadcast: RwLock<RotatingSecret>,
    broadcast_version: RwLock<u8>,
    callbacks: CallbackTable<HubEvent>,
}

impl<T: DatagramTransport, C: Clock> HubEngine<T, C> {
    pub fn new(
        device_id: u32,
        identity: IdentityKeyPair,
        capabilities: String,
        keystore: Arc<KeyStore>,
        transport: Arc<T>,
        clock: Arc<C>,
    ) -> Result<Self, EngineError> {
        let (version, key) = match highest_broadcast_version(&keystore) {
            Some(v) => {
                let key = keystore.broadcast_key(v).ok_or(EngineError::NoBroadcastKey(v))?;
                (v, key)
            }
            None => (0, keystore.generate_broadcast_key(0)?),
        };

        Ok(Self {
            device_id,
            identity,
            capabilities,
            keystore,
            replay: ReplayGuard::new(),
            transport,
            clock,
            state: RwLock::new(HubState::Stopped),
            sensors: RwLock::new(HashMap::new()),
            broadcast: RwLock::new(RotatingSecret::new(key)),
            broadcast_version: RwLock::new(version),
            callbacks: CallbackTable::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn state(&self) -> HubState {
        *self.state.read().expect("hub state lock poisoned")
    }

    pub fn on_device_joined(&self, handler: impl Fn(&HubEvent) + Send + Sync + 'static) {
        self.callbacks.register(callback_keys::DEVICE_JOINED, handler);
    }

    pub fn on_device_left(&self, handler: impl Fn(&HubEvent) + Send + Sync + 'static) {
        self.callbacks.register(callback_keys::DEVICE_LEFT, handler);
    }

    pub fn on_sensor_data(&self, handler: impl Fn(&HubEvent) + Send + Sync + 'static) {
        self.callbacks.register(callback_keys::SENSOR_DATA, handler);
    }

    pub fn on_status_request(&self, handler: impl Fn(&HubEvent) + Send + Sync + 'static) {
        self.callbacks.register(callback_keys::STATUS_REQUEST, handler);
    }

    /// Drive the receive loop until the transport errors out. A transport
    /// failure is fatal and surfaces to the embedder (spec §4.7);
    /// crypto/codec/replay failures on individual datagrams are counted,
    /// logged, and never stop the loop.
    pub async fn run(&self) -> Result<(), EngineError> {
        *self.state.write().expect("hub state lock poisoned") = HubState::Starting;
        info!(hub_id = %format!("{:08X}", self.device_id), "hub starting");
        *self.state.write().expect("hub state lock poisoned") = HubState::Running;

        loop {
            match self.transport.recv().await {
                Ok((bytes, src)) => self.handle_datagram(&bytes, src).await,
                Err(e) => {
                    *self.state.write().expect("hub state lock poisoned") = HubState::Error;
                    return Err(e.into());
                }
            }
        }
    }

    /// Process one inbound datagram, dropping and counting on any failure
    /// (spec §4.6 dispatch ordering, §4.7 propagation policy).
    pub async fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        if let Err(e) = self.dispatch(bytes, src).await {
            use shdc_common::Classify;
            debug!(kind = %e.kind(), err = %e, peer = %src, "dropping inbound datagram");
        }
    }

    async fn dispatch(&self, bytes: &[u8], src: SocketAddr) -> Result<(), EngineError> {
        let msg = Message::from_bytes(bytes)?;
        let now = self.clock.now_unix();
        match MessageType::from_u8(msg.header.msg_type)? {
            MessageType::HubDiscoveryReq => self.handle_discovery_request(msg, src, now).await,
            MessageType::JoinRequest => self.handle_join_request(msg, src, now).await,
            MessageType::EventReport => self.handle_event_report(msg, now).await,
            MessageType::KeyRotation => self.handle_inbound_key_rotation(msg, now),
            MessageType::BroadcastCommand => Err(EngineError::InboundBroadcastRejected),
            MessageType::JoinResponse | MessageType::HubDiscoveryResp => {
                Err(EngineError::InvalidState("hub does not accept outbound-only message types"))
            }
        }
    }

    async fn handle_discovery_request(
        &self,
        msg: Message,
        src: SocketAddr,
        now: i64,
    ) -> Result<(), EngineError> {
        let payload = HubDiscoveryRequestPayload::from_bytes(&msg.payload)?;
        verify(&payload.public_key, &msg.signed_bytes(), &msg.signature)?;
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        let response_payload = HubDiscoveryResponsePayload {
            hub_id: self.device_id,
            hub_public_key: self.identity.public_key_bytes(),
            capabilities: self.capabilities.clone(),
        }
        .to_bytes();
        let response = self.sign(MessageType::HubDiscoveryResp, response_payload, now);
        let bytes = response.to_bytes().map_err(|e| {
            warn!(%e, "discovery response exceeded datagram size bound");
            e
        })?;
        self.transport.send_unicast(src, &bytes).await?;
        Ok(())
    }

    async fn handle_join_request(
        &self,
        msg: Message,
        src: SocketAddr,
        now: i64,
    ) -> Result<(), EngineError> {
        let payload = JoinRequestPayload::from_bytes(&msg.payload)?;
        verify(&payload.public_key, &msg.signed_bytes(), &msg.signature)?;
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        let sensor_id = msg.header.device_id;
        self.keystore.store_peer_public_key(sensor_id, &payload.public_key, &payload.device_info)?;
        let session_key = self.keystore.generate_session_key(sensor_id)?;

        // Session-key derivation key (spec §4.2, §4.6): HKDF over the
        // sensor's pubkey concatenated with the hub's, ordered (hub, sensor)
        // on both ends so the derivation agrees.
        let mut shared_secret = Vec::with_capacity(64);
        shared_secret.extend_from_slice(&payload.public_key);
        shared_secret.extend_from_slice(&self.identity.public_key_bytes());
        let response_key = derive_session_key(&shared_secret, self.device_id, sensor_id)?;

        let broadcast_key_id = *self.broadcast_version.read().expect("broadcast version lock poisoned");
        let response_payload =
            JoinResponsePayload { assigned_id: sensor_id, session_key, broadcast_key_id }.to_bytes();

        let header =
            Header::new(MessageType::JoinResponse as u8, self.device_id, now as u32, random_header_nonce());
        let envelope = envelope::seal(&response_key, &header, &response_payload)?;
        let signed = signed_bytes(&header, &envelope);
        let signature = self.identity.sign(&signed);
        let response = Message::new(header, envelope, signature);
        self.transport.send_unicast(src, &response.to_bytes()?).await?;

        // JOIN_RESPONSE only names the broadcast key's version (spec §4.1);
        // the key bytes themselves never travel in it. Ship them immediately
        // after, still under `response_key` so only this sensor can read
        // them, reusing KEY_ROTATION's payload shape rather than widening
        // the join wire format (see DESIGN.md).
        let broadcast_key = self.broadcast.read().expect("broadcast key lock poisoned").current();
        let bootstrap_header =
            Header::new(MessageType::KeyRotation as u8, self.device_id, now as u32, random_header_nonce());
        let bootstrap_payload = KeyRotationPayload { new_key: broadcast_key, valid_from: now as u32 }.to_bytes();
        let bootstrap_envelope = envelope::seal(&response_key, &bootstrap_header, &bootstrap_payload)?;
        let bootstrap_signature = self.identity.sign(&signed_bytes(&bootstrap_header, &bootstrap_envelope));
        let bootstrap = Message::new(bootstrap_header, bootstrap_envelope, bootstrap_signature);
        self.transport.send_unicast(src, &bootstrap.to_bytes()?).await?;

        self.sensors.write().expect("sensor table lock poisoned").insert(
            sensor_id,
            SensorRecord { address: src, public_key: payload.public_key, session: RotatingSecret::new(session_key) },
        );

        info!(sensor_id = %format!("{sensor_id:08X}"), "sensor joined");
        self.callbacks.dispatch(callback_keys::DEVICE_JOINED, &HubEvent::DeviceJoined { device_id: sensor_id });
        Ok(())
    }

    async fn handle_event_report(&self, msg: Message, now: i64) -> Result<(), EngineError> {
        let sender_id = msg.header.device_id;
        let public_key = {
            let sensors = self.sensors.read().expect("sensor table lock poisoned");
            sensors.get(&sender_id).ok_or(EngineError::NoSessionKey(sender_id))?.public_key
        };

        verify(&public_key, &msg.signed_bytes(), &msg.signature)?;
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        let candidates = {
            let mut sensors = self.sensors.write().expect("sensor table lock poisoned");
            let record = sensors.get_mut(&sender_id).ok_or(EngineError::NoSessionKey(sender_id))?;
            record.session.candidates(now)
        };
        let plaintext = envelope::open(&candidates, &msg.header, &msg.payload)?;
        let payload = EventReportPayload::from_bytes(&plaintext)?;

        self.callbacks.dispatch(
            callback_keys::SENSOR_DATA,
            &HubEvent::SensorData { sender_id, event_type: payload.event_type, data: payload.data },
        );
        Ok(())
    }

    /// Inbound KEY_ROTATION at the hub: only per-peer session-key rotation
    /// is meaningful here, since the hub itself owns the broadcast master
    /// (spec §4.6 "either direction", narrowed per this engine's design —
    /// see DESIGN.md).
    fn handle_inbound_key_rotation(&self, msg: Message, now: i64) -> Result<(), EngineError> {
        let sender_id = msg.header.device_id;
        let public_key = {
            let sensors = self.sensors.read().expect("sensor table lock poisoned");
            sensors.get(&sender_id).ok_or(EngineError::NoSessionKey(sender_id))?.public_key
        };
        verify(&public_key, &msg.signed_bytes(), &msg.signature)?;
        self.replay.check(msg.header.device_id, msg.header.timestamp, msg.header.nonce, now)?;

        let mut sensors = self.sensors.write().expect("sensor table lock poisoned");
        let record = sensors.get_mut(&sender_id).ok_or(EngineError::NoSessionKey(sender_id))?;
        let candidates = record.session.candidates(now);
        let plaintext = envelope::open(&candidates, &msg.header, &msg.payload)?;
        let payload = KeyRotationPayload::from_bytes(&plaintext)?;
        record.session.install_rotation(payload.new_key, payload.valid_from as i64, now);
        Ok(())
    }

    /// Administrative: rotate a sensor's session key and announce it,
    /// encrypted under the outgoing key so the sensor can still decrypt the
    /// announcement itself.
    pub async fn rotate_session_key(&self, sensor_id: u32, valid_from: i64) -> Result<(), EngineError> {
        let (address, old_key) = {
            let sensors = self.sensors.read().expect("sensor table lock poisoned");
            let record = sensors.get(&sensor_id).ok_or(EngineError::NoSessionKey(sensor_id))?;
            (record.address, record.session.current())
        };

        let new_key = self.keystore.rotate_session_key(sensor_id)?;
        {
            let mut sensors = self.sensors.write().expect("sensor table lock poisoned");
            if let Some(record) = sensors.get_mut(&sensor_id) {
                let now = self.clock.now_unix();
                record.session.install_rotation(new_key, valid_from, now);
            }
        }

        let now = self.clock.now_unix();
        let header =
            Header::new(MessageType::KeyRotation as u8, self.device_id, now as u32, random_header_nonce());
        let payload = KeyRotationPayload { new_key, valid_from: valid_from as u32 }.to_bytes();
        let envelope = envelope::seal(&old_key, &header, &payload)?;
        let signature = self.identity.sign(&signed_bytes(&header, &envelope));
        let msg = Message::new(header, envelope, signature);
        self.transport.send_unicast(address, &msg.to_bytes()?).await?;
        Ok(())
    }

    /// Administrative: rotate the broadcast group key and multicast the
    /// announcement, encrypted under the outgoing broadcast key.
    pub async fn rotate_broadcast_keys(&self, group: std::net::Ipv4Addr, port: u16, valid_from: i64) -> Result<(), EngineError> {
        let old_key = self.broadcast.read().expect("broadcast key lock poisoned").current();

        let new_version = self.keystore.rotate_broadcast_keys()?;
        let new_key = self.keystore.broadcast_key(new_version).ok_or(EngineError::NoBroadcastKey(new_version))?;

        let now = self.clock.now_unix();
        {
            let mut broadcast = self.broadcast.write().expect("broadcast key lock poisoned");
            broadcast.install_rotation(new_key, valid_from, now);
            *self.broadcast_version.write().expect("broadcast version lock poisoned") = new_version;
        }

        let header =
            Header::new(MessageType::KeyRotation as u8, self.device_id, now as u32, random_header_nonce());
        let payload = KeyRotationPayload { new_key, valid_from: valid_from as u32 }.to_bytes();
        let envelope = envelope::seal(&old_key, &header, &payload)?;
        let signature = self.identity.sign(&signed_bytes(&header, &envelope));
        let msg = Message::new(header, envelope, signature);
        self.transport.send_multicast(group, port, &msg.to_bytes()?).await?;
        Ok(())
    }

    /// Broadcast a command to every sensor under the current broadcast key
    /// (spec §4.6 "only the hub originates these").
    pub async fn send_broadcast_command(
        &self,
        group: std::net::Ipv4Addr,
        port: u16,
        command_type: u8,
        command_data: Vec<u8>,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_unix();
        let version = *self.broadcast_version.read().expect("broadcast version lock poisoned");
        let key = self.broadcast.read().expect("broadcast key lock poisoned").current();

        let header =
            Header::new(MessageType::BroadcastCommand as u8, self.device_id, now as u32, random_header_nonce());
        let payload = BroadcastCommandPayload { command_type, command_data, broadcast_key_id: version }
            .to_bytes();
        let envelope = envelope::seal(&key, &header, &payload)?;
        let signature = self.identity.sign(&signed_bytes(&header, &envelope));
        let msg = Message::new(header, envelope, signature);
        self.transport.send_multicast(group, port, &msg.to_bytes()?).await?;
        Ok(())
    }

    fn sign(&self, msg_type: MessageType, payload: Vec<u8>, now: i64) -> Message {
        let header = Header::new(msg_type as u8, self.device_id, now as u32, random_header_nonce());
        let signature = self.identity.sign(&signed_bytes(&header, &payload));
        Message::new(header, payload, signature)
    }
}

fn signed_bytes(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}
