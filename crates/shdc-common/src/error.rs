//! The error-kind taxonomy shared across the engine (spec §7).
//!
//! Each crate with its own failure domain defines its own `thiserror` enum;
//! this module holds the cross-cutting [`ErrorKind`] used to categorize and
//! count receive-path drops regardless of which crate raised them.

use std::fmt;

/// One of the seven error kinds named by the protocol's error-handling design.
///
/// Not a type name — a classification used for metrics/logging so a caller
/// can answer "how many drops were crypto failures vs. replay rejections"
/// without matching on every concrete error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Codec,
    Crypto,
    Replay,
    KeyAbsent,
    State,
    Transport,
    Policy,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Codec => "codec",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Replay => "replay",
            ErrorKind::KeyAbsent => "key-absent",
            ErrorKind::State => "state",
            ErrorKind::Transport => "transport",
            ErrorKind::Policy => "policy",
        };
        f.write_str(s)
    }
}

/// Implemented by every crate-local error enum so the engine boundary can
/// classify a dropped datagram without a giant match statement per caller.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
