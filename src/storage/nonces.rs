// src/storage/nonces.rs
//! Challenge ledger persistence and the single-use guarantee.
//!
//! All functions take a `&SqlitePool` and operate on the `nonces` table.
//! Consumption is a compare-and-set on `consumed_at`: the UPDATE carries the
//! `consumed_at IS NULL` precondition, so when two verifiers race on the
//! same nonce the database picks exactly one winner. There is no
//! read-then-write window.

use base64::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::SqlitePool;

use crate::models::nonce::NonceRecord;

/// Entropy of a generated nonce value, before base64url encoding.
const NONCE_BYTES: usize = 24;

/// Value-level outcome of a consumption attempt. None of these are errors;
/// they are verdict inputs for the verification state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The nonce was live and is now spent.
    Consumed,
    /// No nonce with this value was ever issued.
    NotFound,
    /// The nonce was already spent (replay attempt).
    AlreadyUsed {
        /// When the first consumption happened, if known.
        consumed_at: Option<DateTime<Utc>>,
    },
    /// The nonce outlived its TTL without being used.
    Expired,
}

/// Creates and stores a fresh challenge nonce.
///
/// The value is 24 cryptographically random bytes, URL-safe base64 without
/// padding; expiry is `now + ttl` in UTC.
pub async fn issue(pool: &SqlitePool, ttl_seconds: i64) -> Result<NonceRecord, sqlx::Error> {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let value = base64::encode_config(bytes, URL_SAFE_NO_PAD);

    let expires_at = Utc::now() + Duration::seconds(ttl_seconds);
    sqlx::query("INSERT INTO nonces (value, expires_at, consumed_at) VALUES (?, ?, NULL)")
        .bind(&value)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(NonceRecord {
        value,
        expires_at,
        consumed_at: None,
    })
}

/// Attempts to spend a nonce, at most once ever.
///
/// Expiry is compared in UTC against the stored timestamp. The final write
/// re-checks `consumed_at IS NULL` inside the UPDATE itself; losing that
/// race reports [`ConsumeOutcome::AlreadyUsed`] exactly as if the other
/// request had arrived first.
pub async fn consume(pool: &SqlitePool, value: &str) -> Result<ConsumeOutcome, sqlx::Error> {
    let Some(row) = fetch(pool, value).await? else {
        return Ok(ConsumeOutcome::NotFound);
    };

    if let Some(consumed_at) = row.consumed_at {
        return Ok(ConsumeOutcome::AlreadyUsed {
            consumed_at: Some(consumed_at),
        });
    }

    let now = Utc::now();
    if row.expires_at < now {
        return Ok(ConsumeOutcome::Expired);
    }

    let result = sqlx::query("UPDATE nonces SET consumed_at = ? WHERE value = ? AND consumed_at IS NULL")
        .bind(now)
        .bind(value)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        // A concurrent request spent the nonce between our read and the
        // conditional write.
        let consumed_at = fetch(pool, value).await?.and_then(|r| r.consumed_at);
        return Ok(ConsumeOutcome::AlreadyUsed { consumed_at });
    }

    Ok(ConsumeOutcome::Consumed)
}

/// Returns every nonce, newest expiry first, for the admin audit surface.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<NonceRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, NonceRow>(
        "SELECT value, expires_at, consumed_at FROM nonces ORDER BY expires_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(NonceRow::into_record).collect())
}

async fn fetch(pool: &SqlitePool, value: &str) -> Result<Option<NonceRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, NonceRow>(
        "SELECT value, expires_at, consumed_at FROM nonces WHERE value = ?",
    )
    .bind(value)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(NonceRow::into_record))
}

/// Internal row type for sqlx mapping.
///
/// SQLite stores timestamps as text; values without an explicit offset
/// decode as UTC, never local time.
#[derive(sqlx::FromRow)]
struct NonceRow {
    value: String,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

impl NonceRow {
    fn into_record(self) -> NonceRecord {
        NonceRecord {
            value: self.value,
            expires_at: self.expires_at,
            consumed_at: self.consumed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::test_pool;

    #[tokio::test]
    async fn test_issue_generates_url_safe_value() {
        let pool = test_pool().await;
        let nonce = issue(&pool, 60).await.unwrap();

        // 24 bytes -> 32 base64url characters, no padding.
        assert_eq!(nonce.value.len(), 32);
        assert!(!nonce.value.contains('='));
        assert!(nonce.consumed_at.is_none());
        assert!(nonce.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_consume_spends_exactly_once() {
        let pool = test_pool().await;
        let nonce = issue(&pool, 60).await.unwrap();

        assert_eq!(consume(&pool, &nonce.value).await.unwrap(), ConsumeOutcome::Consumed);
        assert!(matches!(
            consume(&pool, &nonce.value).await.unwrap(),
            ConsumeOutcome::AlreadyUsed { consumed_at: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_consume_unknown_value() {
        let pool = test_pool().await;
        assert_eq!(
            consume(&pool, "never-issued").await.unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_consume_expired_nonce() {
        let pool = test_pool().await;
        // Issue with a negative TTL so the nonce is born expired; this is the
        // storage-level equivalent of waiting out the TTL.
        let nonce = issue(&pool, -6).await.unwrap();

        assert_eq!(
            consume(&pool, &nonce.value).await.unwrap(),
            ConsumeOutcome::Expired
        );
    }

    #[tokio::test]
    async fn test_concurrent_consumers_yield_one_winner() {
        let pool = test_pool().await;
        let nonce = issue(&pool, 60).await.unwrap();

        let (a, b) = tokio::join!(consume(&pool, &nonce.value), consume(&pool, &nonce.value));
        let outcomes = [a.unwrap(), b.unwrap()];

        let winners = outcomes
            .iter()
            .filter(|o| **o == ConsumeOutcome::Consumed)
            .count();
        assert_eq!(winners, 1, "exactly one concurrent consume may succeed");
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, ConsumeOutcome::AlreadyUsed { .. })));
    }

    #[tokio::test]
    async fn test_consumed_nonce_stays_consumed() {
        let pool = test_pool().await;
        let nonce = issue(&pool, 60).await.unwrap();
        consume(&pool, &nonce.value).await.unwrap();

        let all = list_all(&pool).await.unwrap();
        let stored = all.iter().find(|n| n.value == nonce.value).unwrap();
        assert!(stored.consumed_at.is_some());
        assert!(!stored.is_usable(Utc::now()));
    }
}
