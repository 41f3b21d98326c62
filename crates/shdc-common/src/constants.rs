//! Protocol-wide constants from SHDC v1.0 §3 and §6.

/// Default UDP port for hub and sensor transports.
pub const SHDC_PORT: u16 = 56700;

/// Multicast group used as a discovery fallback when broadcast is blocked.
pub const SHDC_MULTICAST_IP: &str = "239.255.0.1";

/// Directed broadcast address for discovery requests.
pub const SHDC_BROADCAST_IP: &str = "255.255.255.255";

/// Maximum encoded datagram size; exceeding this on encode is a caller bug.
pub const MAX_PACKET_SIZE: usize = 512;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// Fixed trailing Ed25519 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Replay window tolerance, in seconds, relative to the receiver's clock.
pub const REPLAY_TOLERANCE_SECS: i64 = 30;

/// Device id reserved to mean "unassigned" (never-joined sensor).
pub const UNASSIGNED_DEVICE_ID: u32 = 0x0000_0000;

/// Identity keypair lifetime before regeneration.
pub const IDENTITY_KEY_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// Per-(hub,sensor) session key lifetime.
pub const SESSION_KEY_LIFETIME_SECS: u64 = 24 * 3600;

/// Broadcast group key lifetime.
pub const BROADCAST_KEY_LIFETIME_SECS: u64 = 15 * 60;

/// How long a discovered hub record stays "reachable" without fresh contact.
pub const HUB_RECORD_FRESHNESS_SECS: u64 = 300;

/// Discovery retry policy (spec §4.5 / §8 Scenario F).
pub const DISCOVERY_MAX_ATTEMPTS: u32 = 6;
pub const DISCOVERY_RETRY_INITIAL_SECS: u64 = 5;
pub const DISCOVERY_RETRY_MAX_SECS: u64 = 30;
pub const DISCOVERY_TIMEOUT_SECS: u64 = 5;

/// Continuous (post-join) discovery refresh cadence.
pub const CONTINUOUS_DISCOVERY_INTERVAL_SECS: u64 = 60;
pub const CONTINUOUS_DISCOVERY_TIMEOUT_SECS: u64 = 2;
