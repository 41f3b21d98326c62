//! Shared constants, error taxonomy, configuration, and CLI helpers for the
//! SHDC engine crates.

pub mod clock;
pub mod config;
pub mod constants;
pub mod device_id;
pub mod error;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigOverrides, EngineConfig};
pub use device_id::{parse_device_id, DeviceId};
pub use error::{Classify, ErrorKind};
