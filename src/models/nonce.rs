// src/models/nonce.rs
//! Persisted challenge nonce for the anti-replay protocol.

use chrono::{DateTime, Utc};

/// One row of the challenge ledger.
///
/// `consumed_at` is set exactly once; a consumed nonce never becomes usable
/// again. Expiry is not a stored state but a predicate over `expires_at`.
#[derive(Debug, Clone)]
pub struct NonceRecord {
    /// Cryptographically random, URL-safe value (primary key)
    pub value: String,

    /// UTC instant after which the nonce can no longer be consumed
    pub expires_at: DateTime<Utc>,

    /// UTC instant of consumption, or `None` while still unspent
    pub consumed_at: Option<DateTime<Utc>>,
}

impl NonceRecord {
    /// A nonce is usable iff it was never consumed and has not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && now <= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_in: i64, consumed: bool) -> NonceRecord {
        let now = Utc::now();
        NonceRecord {
            value: "abc".to_string(),
            expires_at: now + Duration::seconds(expires_in),
            consumed_at: consumed.then_some(now),
        }
    }

    #[test]
    fn test_fresh_nonce_is_usable() {
        assert!(record(60, false).is_usable(Utc::now()));
    }

    #[test]
    fn test_consumed_nonce_is_not_usable() {
        assert!(!record(60, true).is_usable(Utc::now()));
    }

    #[test]
    fn test_expired_nonce_is_not_usable() {
        assert!(!record(-1, false).is_usable(Utc::now()));
    }
}
