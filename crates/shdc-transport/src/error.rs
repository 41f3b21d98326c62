//! Transport failure kind (spec §4.7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind UDP socket on {address}: {source}")]
    BindFailed { address: String, source: std::io::Error },

    #[error("failed to set socket option '{option}': {source}")]
    SocketOptionFailed { option: &'static str, source: std::io::Error },

    #[error("failed to join multicast group {group}: {source}")]
    JoinMulticastFailed { group: String, source: std::io::Error },

    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    RecvFailed(#[source] std::io::Error),
}

impl shdc_common::Classify for TransportError {
    fn kind(&self) -> shdc_common::ErrorKind {
        shdc_common::ErrorKind::Transport
    }
}
