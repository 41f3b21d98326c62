//! The dual-key overlap window a KEY_ROTATION announcement opens (spec §4.6,
//! SPEC_FULL.md §4 resolution iii).
//!
//! The key store (`shdc-keystore`) only knows how to replace a key outright;
//! it has no notion of "both old and new are valid until `valid_from`". That
//! window is a protocol-engine concern, so it lives here, one layer up.

/// A key under rotation: a `current` key always accepted, plus an optional
/// `pending` key that becomes accepted once `valid_from` passes the sender's
/// clock — and exclusively accepted from then on.
#[derive(Debug, Clone)]
pub struct RotatingSecret {
    current: [u8; 32],
    pending: Option<Pending>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    new_key: [u8; 32],
    valid_from: i64,
}

impl RotatingSecret {
    pub fn new(key: [u8; 32]) -> Self {
        Self { current: key, pending: None }
    }

    /// Schedule `new_key` to take effect at `valid_from` (UNIX seconds). A
    /// `valid_from` already in the past (relative to `now`) takes effect
    /// immediately (spec §4.6).
    pub fn install_rotation(&mut self, new_key: [u8; 32], valid_from: i64, now: i64) {
        self.pending = Some(Pending { new_key, valid_from });
        self.promote_if_due(now);
    }

    /// Promote `pending` into `current` if its `valid_from` has passed.
    fn promote_if_due(&mut self, now: i64) {
        if let Some(p) = self.pending {
            if now >= p.valid_from {
                self.current = p.new_key;
                self.pending = None;
            }
        }
    }

    /// Keys acceptable for decrypt right now, in try-order. Before
    /// `valid_from`, both keys are tried; once due, only the new key is
    /// offered — the receiver is expected to call this right before
    /// decrypting so the exclusive-cutover rule applies without a separate
    /// timer (spec §8 property 7).
    pub fn candidates(&mut self, now: i64) -> Vec<[u8; 32]> {
        self.promote_if_due(now);
        match self.pending {
            Some(p) => vec![self.current, p.new_key],
            None => vec![self.current],
        }
    }

    pub fn current(&self) -> [u8; 32] {
        self.current
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_returns_both_keys_before_valid_from() {
        let mut secret = RotatingSecret::new([1u8; 32]);
        secret.install_rotation([2u8; 32], 2_000, 1_000);
        let candidates = secret.candidates(1_500);
        assert_eq!(candidates, vec![[1u8; 32], [2u8; 32]]);
    }

    #[test]
    fn candidates_returns_only_new_key_once_due() {
        let mut secret = RotatingSecret::new([1u8; 32]);
        secret.install_rotation([2u8; 32], 2_000, 1_000);
        let candidates = secret.candidates(2_000);
        assert_eq!(candidates, vec![[2u8; 32]]);
        assert!(!secret.has_pending());
    }

    #[test]
    fn valid_from_in_the_past_takes_effect_immediately() {
        let mut secret = RotatingSecret::new([1u8; 32]);
        secret.install_rotation([2u8; 32], 500, 1_000);
        assert_eq!(secret.current(), [2u8; 32]);
        assert!(!secret.has_pending());
    }

    #[test]
    fn no_pending_rotation_offers_only_current() {
        let mut secret = RotatingSecret::new([9u8; 32]);
        assert_eq!(secret.candidates(1_000), vec![[9u8; 32]]);
    }
}
