//! Typed application-facing events (spec §6 "Application-facing event
//! interface").
//!
//! Each event carries decoded, decrypted, validated data — an embedder never
//! sees raw bytes or a codec/crypto type.

/// Events the hub role emits to registered callbacks.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A sensor completed JOIN and is now CONNECTED.
    DeviceJoined { device_id: u32 },
    /// A sensor's session was torn down (session key expired or rotation
    /// failed irrecoverably).
    DeviceLeft { device_id: u32 },
    /// A validated, decrypted EVENT_REPORT from a joined sensor.
    SensorData { sender_id: u32, event_type: u8, data: Vec<u8> },
    /// A sensor asked for the hub's status (supplemented diagnostic path,
    /// see `shdc-hub status`).
    StatusRequest { device_id: u32 },
}

/// Events the sensor role emits to registered callbacks.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// A validated, decrypted BROADCAST_COMMAND from the joined hub.
    ControlMessage { command_type: u8, data: Vec<u8> },
    /// The hub announced a KEY_ROTATION (session or broadcast context) that
    /// this sensor accepted.
    HubRotatedKeys { valid_from: i64 },
}
