//! The external datagram-transport capability and the sensor-side discovery
//! service built on it (spec §4.5, §6).

mod discovery;
mod error;
mod transport;
mod udp;

pub use discovery::{unassigned_device_id, DiscoveredHub, DiscoveryPolicy, DiscoveryService};
pub use error::TransportError;
pub use transport::DatagramTransport;
pub use udp::UdpTransport;
