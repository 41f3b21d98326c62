//! Engine-level error kind (spec §4.6, §4.7).
//!
//! Most receive-path failures never reach this type — codec/crypto/replay
//! errors are counted and dropped at the dispatch boundary per spec §7. This
//! enum exists for the failures that are specific to the engine's own state
//! machine and policy, plus the `#[from]` glue that lets `dispatch` use `?`
//! internally before classifying and dropping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation invalid in current state: {0}")]
    InvalidState(&'static str),

    #[error("no session key for peer 0x{0:08X}")]
    NoSessionKey(u32),

    #[error("no broadcast key for version {0:02X}")]
    NoBroadcastKey(u8),

    #[error("message addressed to an unjoined sensor, type 0x{0:02X} is not permitted pre-join")]
    PreJoinMessageRejected(u8),

    #[error("hub originates broadcast commands; inbound broadcast command rejected")]
    InboundBroadcastRejected,

    #[error(transparent)]
    Codec(#[from] shdc_codec::CodecError),

    #[error(transparent)]
    Crypto(#[from] shdc_crypto::CryptoError),

    #[error(transparent)]
    Replay(#[from] shdc_replay::ReplayError),

    #[error(transparent)]
    KeyStore(#[from] shdc_keystore::KeyStoreError),

    #[error(transparent)]
    Transport(#[from] shdc_transport::TransportError),
}

impl shdc_common::Classify for EngineError {
    fn kind(&self) -> shdc_common::ErrorKind {
        use shdc_common::ErrorKind;
        match self {
            EngineError::InvalidState(_) => ErrorKind::State,
            EngineError::NoSessionKey(_) | EngineError::NoBroadcastKey(_) => ErrorKind::KeyAbsent,
            EngineError::PreJoinMessageRejected(_) | EngineError::InboundBroadcastRejected => {
                ErrorKind::State
            }
            EngineError::Codec(e) => e.kind(),
            EngineError::Crypto(e) => e.kind(),
            EngineError::Replay(e) => e.kind(),
            EngineError::KeyStore(e) => e.kind(),
            EngineError::Transport(e) => e.kind(),
        }
    }
}
