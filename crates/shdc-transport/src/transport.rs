//! The datagram transport capability the protocol engine is built against
//! (spec §6).
//!
//! Kept as a plain trait (not `dyn`-boxed) — the engine is generic over its
//! transport, so the in-memory test double in `shdc-protocol`'s tests and
//! the real Tokio UDP socket below monomorphize to the same call sites with
//! no trait-object or `async-trait` overhead.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::TransportError;

pub trait DatagramTransport: Send + Sync + 'static {
    /// Send `bytes` to a single address (unicast — JOIN_RESPONSE,
    /// HUB_DISCOVERY_RESP, per-peer KEY_ROTATION, ...).
    fn send_unicast(
        &self,
        addr: SocketAddr,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send `bytes` to the directed broadcast address `255.255.255.255`
    /// (HUB_DISCOVERY_REQ primary path).
    fn send_broadcast(&self, port: u16, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send `bytes` to the discovery multicast group (HUB_DISCOVERY_REQ
    /// fallback path, and hub BROADCAST_COMMAND fan-out).
    fn send_multicast(
        &self,
        group: Ipv4Addr,
        port: u16,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Await the next inbound datagram and its source address.
    fn recv(&self) -> impl Future<Output = Result<(Vec<u8>, SocketAddr), TransportError>> + Send;

    /// Best-effort local address, for status/diagnostic display only — never
    /// used for protocol decisions (spec §3 supplemented features).
    fn local_addr(&self) -> Option<IpAddr> {
        None
    }
}
