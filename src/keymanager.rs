//! Key manager (optional, §4.10): hash-chained master-key rotation and
//! resync challenge/response.
//!
//! Same challenge/response shape as `rpc::auth`'s session handshake —
//! advance-then-verify-then-commit, reset to a disconnected state on any
//! mismatch — generalized from a per-client PSK session to a single
//! network-wide key chain. `OCB` nonce naming is kept from the source
//! material even though this crate authenticates packets with
//! HMAC-SHA256 rather than OCB (see DESIGN.md).

use core::time::Duration;

use burster::Limiter;
use hmac_sha256::Hash;
use log::warn;

use crate::error::{Error, Result};

/// One step of the hash chain: `next = SHA256(previous)`.
fn advance_key(key: &[u8; 32]) -> [u8; 32] {
    Hash::hash(key)
}

fn monotonic_now() -> Duration {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

/// Local view of the key-manager state machine (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// No verified master key yet.
    Disconnected,
    /// Holding `current_key` at `current_index`, fully committed.
    Connected,
    /// Advanced the chain to a claimed higher index but the
    /// challenge/response inside the next schedule has not yet
    /// confirmed it; rolls back to `Connected` (or `Disconnected` if
    /// there was no prior key) on failure.
    Tentative,
}

pub struct KeyManager {
    state: KeyState,
    current_key: [u8; 32],
    current_index: u32,
    tentative_key: Option<[u8; 32]>,
    tentative_index: u32,
    /// Key queued by an in-flight rekey, applied only at schedule
    /// activation (§4.10).
    next_master_key: Option<[u8; 32]>,
    /// Throttles `observe_resync`: a spoofed flood of claimed-index
    /// announcements would otherwise force a hash-chain advance per
    /// packet. 5 claims/second, burst of 5.
    resync_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl KeyManager {
    pub fn new(initial_key: [u8; 32]) -> Self {
        Self {
            state: KeyState::Disconnected,
            current_key: initial_key,
            current_index: 0,
            tentative_key: None,
            tentative_index: 0,
            next_master_key: None,
            resync_limiter: burster::TokenBucket::new_with_time_provider(5, 5, monotonic_now as fn() -> Duration),
        }
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    /// Accept the master's initial key at network join.
    pub fn bootstrap(&mut self, key: [u8; 32], index: u32) {
        self.current_key = key;
        self.current_index = index;
        self.state = KeyState::Connected;
    }

    /// Current committed key and its chain index, keyed into the active
    /// OCB-nonce-style authenticator.
    pub fn active_key(&self) -> ([u8; 32], u32) {
        (self.current_key, self.current_index)
    }

    /// §4.10 resync: the master announces `claimed_index`. Advance the
    /// local chain that many steps from the committed key and hold the
    /// result tentatively; reject claimed indices that do not increase.
    pub fn observe_resync(&mut self, claimed_index: u32) -> Result<()> {
        if self.resync_limiter.try_consume(1).is_err() {
            warn!("keymanager: resync claim rate limited");
            return Err(Error::Desync);
        }
        if claimed_index <= self.current_index {
            warn!(
                "keymanager: resync index did not increase (claimed {claimed_index}, have {})",
                self.current_index
            );
            return Err(Error::Desync);
        }
        let mut key = self.current_key;
        for _ in self.current_index..claimed_index {
            key = advance_key(&key);
        }
        self.tentative_key = Some(key);
        self.tentative_index = claimed_index;
        self.state = KeyState::Tentative;
        Ok(())
    }

    /// §4.10: verify the challenge/response carried in the next
    /// schedule against the tentative key. Commits on success; rolls
    /// back to DISCONNECTED on failure (the stream layer treats any
    /// ESTABLISHED streams as surviving the rollback only if a
    /// subsequent resync succeeds before `masterChallengeAuthenticationTimeout`).
    pub fn verify_challenge(&mut self, challenge: &[u8], tag: &[u8; 32]) -> bool {
        let Some(key) = self.tentative_key else {
            warn!("keymanager: verify_challenge called outside Tentative state");
            return false;
        };
        if !hmac_sha256::HMAC::verify(challenge, key, tag) {
            warn!("keymanager: challenge verification failed, rolling back");
            self.rollback();
            return false;
        }
        self.current_key = key;
        self.current_index = self.tentative_index;
        self.tentative_key = None;
        self.state = KeyState::Connected;
        true
    }

    fn rollback(&mut self) {
        self.tentative_key = None;
        self.state = if self.current_index == 0 {
            KeyState::Disconnected
        } else {
            KeyState::Connected
        };
    }

    /// Compute the response tag a receiver sends back for `challenge`,
    /// using the tentative key if one is held (mid-resync) or the
    /// committed key otherwise.
    pub fn respond_to_challenge(&self, challenge: &[u8]) -> [u8; 32] {
        let key = self.tentative_key.unwrap_or(self.current_key);
        hmac_sha256::HMAC::mac(challenge, key)
    }

    /// Queue a key to take effect at the next schedule activation,
    /// independent of the resync/challenge path (master-side rekey
    /// announcement racing a schedule push).
    pub fn queue_rekey(&mut self, key: [u8; 32]) {
        self.next_master_key = Some(key);
    }

    /// Apply any queued rekey; called by the schedule-distribution
    /// phase exactly at `activationTile`.
    pub fn apply_queued_rekey(&mut self) {
        if let Some(key) = self.next_master_key.take() {
            self.current_key = key;
            self.current_index += 1;
        }
    }

    pub fn on_desync(&mut self) {
        self.tentative_key = None;
        self.state = KeyState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_then_resync_commits_on_valid_challenge() {
        let mut km = KeyManager::new([0u8; 32]);
        km.bootstrap([1u8; 32], 5);
        km.observe_resync(7).unwrap();
        assert_eq!(km.state(), KeyState::Tentative);

        let challenge = b"schedule-activation-7";
        let tag = km.respond_to_challenge(challenge);
        assert!(km.verify_challenge(challenge, &tag));
        assert_eq!(km.state(), KeyState::Connected);
        assert_eq!(km.active_key().1, 7);
    }

    #[test]
    fn resync_rejects_non_increasing_index() {
        let mut km = KeyManager::new([0u8; 32]);
        km.bootstrap([1u8; 32], 5);
        assert_eq!(km.observe_resync(5), Err(Error::Desync));
        assert_eq!(km.observe_resync(3), Err(Error::Desync));
    }

    #[test]
    fn failed_challenge_rolls_back_without_advancing_index() {
        let mut km = KeyManager::new([0u8; 32]);
        km.bootstrap([1u8; 32], 5);
        km.observe_resync(6).unwrap();
        let bad_tag = [0xFFu8; 32];
        assert!(!km.verify_challenge(b"challenge", &bad_tag));
        assert_eq!(km.state(), KeyState::Connected);
        assert_eq!(km.active_key().1, 5);
    }

    #[test]
    fn queued_rekey_applies_only_on_activation() {
        let mut km = KeyManager::new([0u8; 32]);
        km.bootstrap([1u8; 32], 5);
        km.queue_rekey([9u8; 32]);
        assert_eq!(km.active_key(), ([1u8; 32], 5));
        km.apply_queued_rekey();
        assert_eq!(km.active_key(), ([9u8; 32], 6));
    }

    #[test]
    fn on_desync_clears_tentative_state() {
        let mut km = KeyManager::new([0u8; 32]);
        km.bootstrap([1u8; 32], 5);
        km.observe_resync(6).unwrap();
        km.on_desync();
        assert_eq!(km.state(), KeyState::Disconnected);
    }
}
