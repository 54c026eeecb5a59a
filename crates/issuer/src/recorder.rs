//! Process-lifetime set of consumed (account, token) pairs, checked before
//! any I/O.
//!
//! This is a cache in front of the ledger and uses the same key, so a hit
//! here always agrees with the ledger. A miss says nothing about whether the
//! pair was redeemed before a restart.
//!
//! The recorder also tracks pairs currently being redeemed. Credit is
//! applied before the ledger record is written, so two attempts on the same
//! pair must not both get past the dedup check.
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::RwLock;

use license_sdk::hash_token;

type RedemptionKey = (String, [u8; 32]);

fn redemption_key(uid: &str, token: &str) -> RedemptionKey {
    (uid.to_string(), hash_token(token))
}

#[derive(Default)]
pub struct DuplicateRecorder {
    seen: RwLock<HashSet<RedemptionKey>>,
    in_flight: Mutex<HashSet<RedemptionKey>>,
}

/// Held while a pair is being redeemed; releases the claim on drop.
pub struct TokenClaim<'a> {
    recorder: &'a DuplicateRecorder,
    key: RedemptionKey,
}

impl Drop for TokenClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .recorder
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.key);
    }
}

impl DuplicateRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(&self, uid: &str, token: &str) -> bool {
        self.seen.read().await.contains(&redemption_key(uid, token))
    }

    pub async fn add(&self, uid: &str, token: &str) {
        self.seen.write().await.insert(redemption_key(uid, token));
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    /// Claims the pair for one redemption attempt. `None` if another attempt
    /// holds it.
    pub fn claim(&self, uid: &str, token: &str) -> Option<TokenClaim<'_>> {
        let key = redemption_key(uid, token);
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(TokenClaim {
            recorder: self,
            key,
        })
    }
}
