//! Tokio UDP socket implementation of [`DatagramTransport`] (spec §6).
//!
//! Binds with `socket2` so `SO_REUSEADDR`/`SO_BROADCAST` can be set before
//! the socket is handed to Tokio, the same sequencing used for LAN discovery
//! sockets elsewhere in this codebase.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use shdc_common::constants::MAX_PACKET_SIZE;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::{DatagramTransport, TransportError};

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: Option<IpAddr>,
}

impl UdpTransport {
    /// Bind a UDP socket on `bind_address:port` with `SO_REUSEADDR` and
    /// broadcast enabled.
    pub async fn bind(bind_address: &str, port: u16) -> Result<Self, TransportError> {
        let ip: Ipv4Addr = bind_address
            .parse()
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| TransportError::BindFailed { address: addr.to_string(), source })?;

        socket
            .set_reuse_address(true)
            .map_err(|source| TransportError::SocketOptionFailed { option: "SO_REUSEADDR", source })?;
        socket
            .set_broadcast(true)
            .map_err(|source| TransportError::SocketOptionFailed { option: "SO_BROADCAST", source })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| TransportError::SocketOptionFailed { option: "O_NONBLOCK", source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| TransportError::BindFailed { address: addr.to_string(), source })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket)
            .map_err(|source| TransportError::BindFailed { address: addr.to_string(), source })?;

        let local_addr = local_ip_guess();
        debug!(%addr, ?local_addr, "bound SHDC UDP transport");

        Ok(Self { socket: tokio_socket, local_addr })
    }

    /// Join the discovery multicast group on the default interface, or on
    /// `interface` if given (spec §4.5, §6).
    pub fn join_multicast(&self, group: Ipv4Addr, interface: Option<Ipv4Addr>) -> Result<(), TransportError> {
        let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        self.socket
            .join_multicast_v4(group, iface)
            .map_err(|source| TransportError::JoinMulticastFailed { group: group.to_string(), source })
    }
}

impl DatagramTransport for UdpTransport {
    async fn send_unicast(&self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(bytes, addr).await.map(|_| ()).map_err(TransportError::SendFailed)
    }

    async fn send_broadcast(&self, port: u16, bytes: &[u8]) -> Result<(), TransportError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
        self.socket.send_to(bytes, addr).await.map(|_| ()).map_err(TransportError::SendFailed)
    }

    async fn send_multicast(&self, group: Ipv4Addr, port: u16, bytes: &[u8]) -> Result<(), TransportError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(group, port));
        self.socket.send_to(bytes, addr).await.map(|_| ()).map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await.map_err(TransportError::RecvFailed)?;
            if len > MAX_PACKET_SIZE {
                warn!(len, %src, "dropping oversize inbound datagram");
                continue;
            }
            return Ok((buf[..len].to_vec(), src));
        }
    }

    fn local_addr(&self) -> Option<IpAddr> {
        self.local_addr
    }
}

/// Best-effort local address for diagnostics (`shdc-sensor status`), via the
/// connect-to-a-public-address trick — never used for protocol decisions
/// (spec §3 supplemented features, `UDPTransport.get_local_addresses`
/// fallback in the original implementation).
fn local_ip_guess() -> Option<IpAddr> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    probe.connect("8.8.8.8:80").ok()?;
    probe.local_addr().ok().map(|a| a.ip())
}
