//! Per-sender sliding-window replay defense (spec §4.4).
//!
//! Consulted *after* signature verification — callers must not feed this
//! guard unauthenticated `device_id`s, or an attacker could exhaust a
//! victim's window with forged senders.

use std::collections::HashMap;
use std::sync::RwLock;

use shdc_common::constants::{REPLAY_TOLERANCE_SECS, UNASSIGNED_DEVICE_ID};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("timestamp {timestamp} is {delta}s from receiver clock, outside the {tolerance}s window")]
    TimestampOutOfWindow { timestamp: i64, delta: i64, tolerance: i64 },

    #[error("duplicate (device_id 0x{device_id:08X}, nonce {nonce:02X?}) within the replay window")]
    DuplicateNonce { device_id: u32, nonce: [u8; 3] },
}

impl shdc_common::Classify for ReplayError {
    fn kind(&self) -> shdc_common::ErrorKind {
        shdc_common::ErrorKind::Replay
    }
}

struct SenderWindow {
    highest_timestamp: i64,
    /// nonce -> timestamp it was seen at, so stale entries can be evicted.
    nonces: HashMap<[u8; 3], i64>,
}

impl SenderWindow {
    fn new() -> Self {
        Self { highest_timestamp: i64::MIN, nonces: HashMap::new() }
    }

    fn evict_stale(&mut self, now: i64, tolerance: i64) {
        self.nonces.retain(|_, seen_at| (now - *seen_at).abs() <= tolerance);
    }
}

/// Tracks recently-accepted (device_id, nonce) pairs and enforces the ±30s
/// timestamp tolerance against the receiver's clock (spec §4.4).
pub struct ReplayGuard {
    tolerance_secs: i64,
    senders: RwLock<HashMap<u32, SenderWindow>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::with_tolerance(REPLAY_TOLERANCE_SECS)
    }

    pub fn with_tolerance(tolerance_secs: i64) -> Self {
        Self { tolerance_secs, senders: RwLock::new(HashMap::new()) }
    }

    /// Check and, if accepted, record a datagram's (device_id, timestamp,
    /// nonce). `now` is the receiver's current UNIX time.
    ///
    /// `device_id == 0` (an unassigned sensor's HUB_DISCOVERY_REQ) bypasses
    /// the per-sender duplicate check but is still bounded by the timestamp
    /// tolerance (spec §4.4 special case).
    pub fn check(&self, device_id: u32, timestamp: u32, nonce: [u8; 3], now: i64) -> Result<(), ReplayError> {
        let ts = timestamp as i64;
        let delta = now - ts;
        if delta.abs() > self.tolerance_secs {
            return Err(ReplayError::TimestampOutOfWindow { timestamp: ts, delta, tolerance: self.tolerance_secs });
        }

        if device_id == UNASSIGNED_DEVICE_ID {
            return Ok(());
        }

        let mut senders = self.senders.write().expect("replay guard lock poisoned");
        let window = senders.entry(device_id).or_insert_with(SenderWindow::new);
        window.evict_stale(now, self.tolerance_secs);

        if window.nonces.contains_key(&nonce) {
            return Err(ReplayError::DuplicateNonce { device_id, nonce });
        }

        window.nonces.insert(nonce, ts);
        window.highest_timestamp = window.highest_timestamp.max(ts);
        Ok(())
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fresh_datagram() {
        let guard = ReplayGuard::new();
        assert!(guard.check(1, 1_000, [1, 2, 3], 1_000).is_ok());
    }

    #[test]
    fn rejects_duplicate_nonce_within_window() {
        let guard = ReplayGuard::new();
        guard.check(1, 1_000, [1, 2, 3], 1_000).unwrap();
        let err = guard.check(1, 1_000, [1, 2, 3], 1_010).unwrap_err();
        assert!(matches!(err, ReplayError::DuplicateNonce { .. }));
    }

    #[test]
    fn same_nonce_from_different_sender_is_not_a_duplicate() {
        let guard = ReplayGuard::new();
        guard.check(1, 1_000, [1, 2, 3], 1_000).unwrap();
        assert!(guard.check(2, 1_000, [1, 2, 3], 1_000).is_ok());
    }

    #[test]
    fn rejects_timestamp_outside_tolerance() {
        let guard = ReplayGuard::new();
        let err = guard.check(1, 1_000, [1, 2, 3], 1_031).unwrap_err();
        assert!(matches!(err, ReplayError::TimestampOutOfWindow { .. }));
    }

    #[test]
    fn replaying_after_window_expires_is_still_rejected_by_timestamp() {
        let guard = ReplayGuard::new();
        guard.check(1, 1_000, [1, 2, 3], 1_000).unwrap();
        // Same datagram, receiver clock now 45s later: rejected by timestamp
        // check, not treated as a fresh duplicate window.
        let err = guard.check(1, 1_000, [1, 2, 3], 1_045).unwrap_err();
        assert!(matches!(err, ReplayError::TimestampOutOfWindow { .. }));
    }

    #[test]
    fn unassigned_device_bypasses_duplicate_check() {
        let guard = ReplayGuard::new();
        guard.check(0, 1_000, [9, 9, 9], 1_000).unwrap();
        // Same (0, nonce) again: still accepted, since device 0 is exempt.
        assert!(guard.check(0, 1_000, [9, 9, 9], 1_000).is_ok());
    }

    #[test]
    fn unassigned_device_is_still_bounded_by_timestamp() {
        let guard = ReplayGuard::new();
        let err = guard.check(0, 1_000, [9, 9, 9], 1_100).unwrap_err();
        assert!(matches!(err, ReplayError::TimestampOutOfWindow { .. }));
    }

    #[test]
    fn stale_nonces_are_evicted_allowing_reuse_after_window() {
        let guard = ReplayGuard::with_tolerance(5);
        guard.check(1, 1_000, [1, 2, 3], 1_000).unwrap();
        // Move the receiver clock and sender timestamp forward together,
        // well past the tolerance, with a fresh nonce to stay in-window.
        guard.check(1, 1_010, [4, 5, 6], 1_010).unwrap();
        // The original nonce, now evicted, is no longer tracked — but the
        // original timestamp itself is far outside tolerance from "now".
        let err = guard.check(1, 1_000, [1, 2, 3], 1_010).unwrap_err();
        assert!(matches!(err, ReplayError::TimestampOutOfWindow { .. }));
    }
}
