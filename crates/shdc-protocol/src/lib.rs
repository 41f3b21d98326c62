//! The SHDC v1.0 protocol engine: role-parameterized state machines wiring
//! together codec, crypto, key store, replay guard, and transport crates
//! into the hub and sensor sides of the protocol (spec §4.6).

mod callbacks;
mod envelope;
pub mod error;
pub mod events;
pub mod hub;
pub mod session;
pub mod sensor;

pub use error::EngineError;
pub use events::{HubEvent, SensorEvent};
pub use hub::{HubEngine, HubState};
pub use session::RotatingSecret;
pub use sensor::{SensorEngine, SensorState};
