//! On-disk key generation, persistence, and lifecycle management for SHDC
//! devices (spec §4.3).
//!
//! No protocol knowledge lives here — this crate only knows how to mint,
//! persist, expire, and rotate key material. Wiring keys into the handshake
//! and message dispatch belongs to `shdc-protocol`.

mod info;
mod store;

pub use info::{KeyInfo, KeyType};
pub use store::{KeyStore, KeyStoreError};
