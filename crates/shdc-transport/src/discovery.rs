//! Sensor-side hub discovery (spec §4.5).
//!
//! Broadcasts (and multicasts, as a fallback) a `HUB_DISCOVERY_REQ`, collects
//! `HUB_DISCOVERY_RESP` datagrams for a bounded window, and retries with
//! exponential backoff until at least one hub answers or the retry budget is
//! exhausted. Trust-on-first-use: the public key carried in a hub's first
//! response is pinned for that `hub_id` thereafter.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use shdc_codec::{Header, HubDiscoveryResponsePayload, JoinRequestPayload, Message, MessageType};
use shdc_common::constants::{HUB_RECORD_FRESHNESS_SECS, SHDC_MULTICAST_IP, UNASSIGNED_DEVICE_ID};
use shdc_crypto::{random_header_nonce, verify, IdentityKeyPair};
use tracing::{debug, warn};

use crate::{DatagramTransport, TransportError};

/// A pinned, reachable hub record (spec §3 "Discovered hub record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHub {
    pub hub_id: u32,
    pub address: SocketAddr,
    pub public_key: [u8; 32],
    pub capabilities: String,
    pub discovered_at: i64,
    pub last_contact_at: i64,
    first_seen_seq: u64,
}

/// Policy knobs for a discovery attempt/retry sequence (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryPolicy {
    pub port: u16,
    pub per_attempt_timeout: Duration,
    pub max_attempts: u32,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            port: shdc_common::constants::SHDC_PORT,
            per_attempt_timeout: Duration::from_secs(shdc_common::constants::DISCOVERY_TIMEOUT_SECS),
            max_attempts: shdc_common::constants::DISCOVERY_MAX_ATTEMPTS,
            retry_initial: Duration::from_secs(shdc_common::constants::DISCOVERY_RETRY_INITIAL_SECS),
            retry_max: Duration::from_secs(shdc_common::constants::DISCOVERY_RETRY_MAX_SECS),
        }
    }
}

pub struct DiscoveryService<T: DatagramTransport> {
    transport: std::sync::Arc<T>,
    multicast_group: Ipv4Addr,
    hubs: RwLock<HashMap<u32, DiscoveredHub>>,
    seq: AtomicU64,
}

impl<T: DatagramTransport> DiscoveryService<T> {
    pub fn new(transport: std::sync::Arc<T>) -> Self {
        Self {
            transport,
            multicast_group: SHDC_MULTICAST_IP.parse().expect("constant is a valid IPv4 address"),
            hubs: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Build and send one signed HUB_DISCOVERY_REQ on both the broadcast
    /// address and the multicast fallback group.
    async fn send_request(
        &self,
        identity: &IdentityKeyPair,
        device_id: u32,
        info: &str,
        now: i64,
        port: u16,
    ) -> Result<(), TransportError> {
        let header = Header::new(MessageType::HubDiscoveryReq as u8, device_id, now as u32, random_header_nonce());
        let payload = JoinRequestPayload { public_key: identity.public_key_bytes(), device_info: info.to_string() }
            .to_bytes();
        let signed = {
            let mut buf = header.to_bytes().to_vec();
            buf.extend_from_slice(&payload);
            buf
        };
        let signature = identity.sign(&signed);
        let msg = Message::new(header, payload, signature);
        let bytes = msg.to_bytes().expect("discovery request always fits the datagram size bound");

        self.transport.send_broadcast(port, &bytes).await?;
        self.transport.send_multicast(self.multicast_group, port, &bytes).await?;
        Ok(())
    }

    /// Parse and validate one inbound datagram as a HUB_DISCOVERY_RESP,
    /// merging it into the hub table. Returns the hub_id on success.
    ///
    /// Anything that isn't a well-formed, signed HUB_DISCOVERY_RESP is
    /// dropped and logged at debug (spec §4.7) — discovery never propagates
    /// a crypto/codec failure to the caller.
    pub fn handle_response(&self, bytes: &[u8], src: SocketAddr, now: i64) -> Option<u32> {
        let msg = match Message::from_bytes(bytes) {
            Ok(m) => m,
            Err(e) => {
                debug!(%e, "dropping malformed discovery response");
                return None;
            }
        };
        if msg.header.msg_type != MessageType::HubDiscoveryResp as u8 {
            return None;
        }
        let payload = match HubDiscoveryResponsePayload::from_bytes(&msg.payload) {
            Ok(p) => p,
            Err(e) => {
                debug!(%e, "dropping undecodable discovery response payload");
                return None;
            }
        };
        if let Err(e) = verify(&payload.hub_public_key, &msg.signed_bytes(), &msg.signature) {
            debug!(%e, hub_id = %format!("{:08X}", payload.hub_id), "dropping discovery response with bad signature");
            return None;
        }

        let hub_id = payload.hub_id;
        let mut hubs = self.hubs.write().expect("discovery hub table lock poisoned");
        match hubs.get_mut(&hub_id) {
            Some(existing) if existing.address != src => {
                warn!(hub_id = %format!("{hub_id:08X}"), existing = %existing.address, new = %src,
                    "hub_id seen from a second address — keeping first, ignoring");
            }
            Some(existing) if existing.public_key != payload.hub_public_key => {
                warn!(hub_id = %format!("{hub_id:08X}"),
                    "hub_id announced a different public key than its pinned one — ignoring (possible spoof)");
            }
            Some(existing) => {
                existing.last_contact_at = now;
                existing.capabilities = payload.capabilities;
            }
            None => {
                let first_seen_seq = self.seq.fetch_add(1, Ordering::SeqCst);
                hubs.insert(
                    hub_id,
                    DiscoveredHub {
                        hub_id,
                        address: src,
                        public_key: payload.hub_public_key,
                        capabilities: payload.capabilities,
                        discovered_at: now,
                        last_contact_at: now,
                        first_seen_seq,
                    },
                );
            }
        }
        Some(hub_id)
    }

    /// One discovery attempt: send the request, then collect responses
    /// until `timeout` elapses. Returns the number of distinct hubs newly
    /// confirmed reachable during this attempt.
    pub async fn discover_once(
        &self,
        identity: &IdentityKeyPair,
        device_id: u32,
        info: &str,
        now: i64,
        policy: &DiscoveryPolicy,
    ) -> Result<usize, TransportError> {
        self.send_request(identity, device_id, info, now, policy.port).await?;

        let deadline = tokio::time::Instant::now() + policy.per_attempt_timeout;
        let mut confirmed = std::collections::HashSet::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.transport.recv()).await {
                Ok(Ok((bytes, src))) => {
                    if let Some(hub_id) = self.handle_response(&bytes, src, now) {
                        confirmed.insert(hub_id);
                    }
                }
                Ok(Err(e)) => {
                    debug!(%e, "transport error during discovery window, continuing");
                }
                Err(_elapsed) => break,
            }
        }
        Ok(confirmed.len())
    }

    /// Discover with retry: up to `policy.max_attempts`, exponential backoff
    /// from `retry_initial` capped at `retry_max`, stopping as soon as one
    /// hub is found (spec §4.5, §8 Scenario F).
    pub async fn discover_with_retry(
        &self,
        identity: &IdentityKeyPair,
        device_id: u32,
        info: &str,
        now: impl Fn() -> i64,
        policy: &DiscoveryPolicy,
    ) -> Result<Vec<DiscoveredHub>, TransportError> {
        let mut delay = policy.retry_initial;
        for attempt in 0..policy.max_attempts {
            let found = self.discover_once(identity, device_id, info, now(), policy).await?;
            if found > 0 {
                return Ok(self.all_hubs());
            }
            if attempt + 1 < policy.max_attempts {
                debug!(attempt, delay_secs = delay.as_secs(), "no hub found, backing off before retry");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.retry_max);
            }
        }
        Ok(Vec::new())
    }

    /// The most recently discovered hub, ties broken by whichever was first
    /// seen (spec §4.5 selection rule: `discovered_at` is frozen at first
    /// contact and never updated on repeat contact — `last_contact_at` is a
    /// separate field used only by the 300s reachability check below).
    pub fn best_hub(&self) -> Option<DiscoveredHub> {
        let hubs = self.hubs.read().expect("discovery hub table lock poisoned");
        hubs.values()
            .max_by_key(|h| (h.discovered_at, std::cmp::Reverse(h.first_seen_seq)))
            .cloned()
    }

    pub fn get_hub_by_id(&self, hub_id: u32) -> Option<DiscoveredHub> {
        self.hubs.read().expect("discovery hub table lock poisoned").get(&hub_id).cloned()
    }

    pub fn all_hubs(&self) -> Vec<DiscoveredHub> {
        self.hubs.read().expect("discovery hub table lock poisoned").values().cloned().collect()
    }

    pub fn clear_discovered_hubs(&self) {
        self.hubs.write().expect("discovery hub table lock poisoned").clear();
    }

    pub fn is_hub_reachable(&self, hub_id: u32, now: i64) -> bool {
        self.get_hub_by_id(hub_id)
            .is_some_and(|h| (now - h.last_contact_at) as u64 <= HUB_RECORD_FRESHNESS_SECS)
    }

    /// Drop records untouched for longer than the freshness window (spec
    /// §4.5 continuous mode pruning).
    pub fn prune_stale(&self, now: i64) {
        self.hubs
            .write()
            .expect("discovery hub table lock poisoned")
            .retain(|_, h| (now - h.last_contact_at) as u64 <= HUB_RECORD_FRESHNESS_SECS);
    }
}

/// `device_id = 0` marks a sensor that has never joined (spec §3).
pub fn unassigned_device_id() -> u32 {
    UNASSIGNED_DEVICE_ID
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct LoopbackTransport {
        inbound: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self { inbound: Mutex::new(VecDeque::new()), sent: Mutex::new(Vec::new()) }
        }

        fn push_inbound(&self, bytes: Vec<u8>, src: SocketAddr) {
            self.inbound.lock().unwrap().push_back((bytes, src));
        }
    }

    impl DatagramTransport for LoopbackTransport {
        async fn send_unicast(&self, _addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn send_broadcast(&self, _port: u16, bytes: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn send_multicast(&self, _group: Ipv4Addr, _port: u16, bytes: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
            loop {
                if let Some(item) = self.inbound.lock().unwrap().pop_front() {
                    return Ok(item);
                }
                tokio::task::yield_now().await;
            }
        }
    }

    fn make_response(hub_id: u32, identity: &IdentityKeyPair, now: i64) -> Vec<u8> {
        let header = Header::new(MessageType::HubDiscoveryResp as u8, hub_id, now as u32, [1, 2, 3]);
        let payload =
            HubDiscoveryResponsePayload { hub_id, hub_public_key: identity.public_key_bytes(), capabilities: "v1".into() }
                .to_bytes();
        let signed = {
            let mut buf = header.to_bytes().to_vec();
            buf.extend_from_slice(&payload);
            buf
        };
        let signature = identity.sign(&signed);
        Message::new(header, payload, signature).to_bytes().unwrap()
    }

    #[test]
    fn handle_response_pins_new_hub() {
        let transport = std::sync::Arc::new(LoopbackTransport::new());
        let service = DiscoveryService::new(transport);
        let hub_identity = IdentityKeyPair::generate();
        let src: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        let bytes = make_response(0x12345678, &hub_identity, 1_000);

        let hub_id = service.handle_response(&bytes, src, 1_000).unwrap();
        assert_eq!(hub_id, 0x12345678);
        assert_eq!(service.get_hub_by_id(hub_id).unwrap().public_key, hub_identity.public_key_bytes());
    }

    #[test]
    fn second_address_for_same_hub_id_is_ignored() {
        let transport = std::sync::Arc::new(LoopbackTransport::new());
        let service = DiscoveryService::new(transport);
        let hub_identity = IdentityKeyPair::generate();
        let first: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        let second: SocketAddr = "192.168.1.5:56700".parse().unwrap();

        service.handle_response(&make_response(1, &hub_identity, 1_000), first, 1_000);
        service.handle_response(&make_response(1, &hub_identity, 1_010), second, 1_010);

        assert_eq!(service.get_hub_by_id(1).unwrap().address, first);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let transport = std::sync::Arc::new(LoopbackTransport::new());
        let service = DiscoveryService::new(transport);
        let hub_identity = IdentityKeyPair::generate();
        let src: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        let mut bytes = make_response(1, &hub_identity, 1_000);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(service.handle_response(&bytes, src, 1_000).is_none());
        assert!(service.get_hub_by_id(1).is_none());
    }

    #[tokio::test]
    async fn discover_once_collects_responses_within_timeout() {
        let transport = std::sync::Arc::new(LoopbackTransport::new());
        let hub_identity = IdentityKeyPair::generate();
        let src: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        transport.push_inbound(make_response(0xAAAA_BBBB, &hub_identity, 1_000), src);

        let service = DiscoveryService::new(transport);
        let sensor_identity = IdentityKeyPair::generate();
        let policy = DiscoveryPolicy { per_attempt_timeout: Duration::from_millis(50), ..Default::default() };

        let found = service
            .discover_once(&sensor_identity, 0, "motion", 1_000, &policy)
            .await
            .unwrap();
        assert_eq!(found, 1);
        assert!(service.best_hub().is_some());
    }

    #[test]
    fn prune_stale_drops_old_records() {
        let transport = std::sync::Arc::new(LoopbackTransport::new());
        let service = DiscoveryService::new(transport);
        let hub_identity = IdentityKeyPair::generate();
        let src: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        service.handle_response(&make_response(1, &hub_identity, 1_000), src, 1_000);

        service.prune_stale(1_000 + HUB_RECORD_FRESHNESS_SECS as i64 + 1);
        assert!(service.get_hub_by_id(1).is_none());
    }
}
