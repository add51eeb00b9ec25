// src/storage/credentials.rs
//! Credential ledger persistence.
//!
//! All functions take a `&SqlitePool` and operate on the `credentials`
//! table. Every read goes to the database; there is no cache in front of
//! the ledger, and a committed revocation is visible to the very next
//! verification.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::credential::{CredentialRecord, CredentialStatus};

/// Ledger write failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A credential with this jti already exists. With UUID-generated
    /// identifiers this is astronomically unlikely, but it must surface as
    /// an error rather than corrupt the ledger.
    #[error("credential '{0}' already exists in the ledger")]
    DuplicateJti(String),

    /// Underlying database failure.
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Records a freshly issued credential with status `valid`.
///
/// `created_at` is stamped here, by the ledger, never by the caller.
pub async fn insert(pool: &SqlitePool, jti: &str, token: &str) -> Result<(), StoreError> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO credentials (jti, token, status, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(jti)
    .bind(token)
    .bind(CredentialStatus::Valid.as_str())
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) => {
            Err(StoreError::DuplicateJti(jti.to_string()))
        }
        Err(e) => Err(StoreError::Db(e)),
    }
}

/// Fetches a credential by its identifier.
pub async fn get_by_jti(
    pool: &SqlitePool,
    jti: &str,
) -> Result<Option<CredentialRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT jti, token, status, created_at FROM credentials WHERE jti = ?",
    )
    .bind(jti)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CredentialRow::into_record))
}

/// Marks a credential as revoked.
///
/// Returns `true` if the credential exists (whether or not it was already
/// revoked: re-revoking is a no-op success) and `false` if no such jti was
/// ever issued. The status write is
/// unconditional, so the transition is monotonic: once revoked, always
/// revoked.
pub async fn revoke(pool: &SqlitePool, jti: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE credentials SET status = ? WHERE jti = ?")
        .bind(CredentialStatus::Revoked.as_str())
        .bind(jti)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns every credential, newest first, for the admin audit surface.
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<CredentialRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, CredentialRow>(
        "SELECT jti, token, status, created_at FROM credentials ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CredentialRow::into_record).collect())
}

/// Internal row type for sqlx mapping.
///
/// SQLite stores the timestamp as text; values without an explicit offset
/// decode as UTC.
#[derive(sqlx::FromRow)]
struct CredentialRow {
    jti: String,
    token: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl CredentialRow {
    fn into_record(self) -> CredentialRecord {
        CredentialRecord {
            jti: self.jti,
            token: self.token,
            status: CredentialStatus::parse(&self.status),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::test_pool;

    #[tokio::test]
    async fn test_insert_and_get() {
        let pool = test_pool().await;
        insert(&pool, "urn:uuid:abc", "a.b.c").await.unwrap();

        let record = get_by_jti(&pool, "urn:uuid:abc").await.unwrap().unwrap();
        assert_eq!(record.jti, "urn:uuid:abc");
        assert_eq!(record.token, "a.b.c");
        assert_eq!(record.status, CredentialStatus::Valid);
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let pool = test_pool().await;
        assert!(get_by_jti(&pool, "urn:uuid:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_jti_is_rejected() {
        let pool = test_pool().await;
        insert(&pool, "urn:uuid:dup", "a.b.c").await.unwrap();

        let err = insert(&pool, "urn:uuid:dup", "x.y.z").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateJti(_)));

        // The original token must be untouched.
        let record = get_by_jti(&pool, "urn:uuid:dup").await.unwrap().unwrap();
        assert_eq!(record.token, "a.b.c");
    }

    #[tokio::test]
    async fn test_revoke_is_monotonic_and_idempotent() {
        let pool = test_pool().await;
        insert(&pool, "urn:uuid:r1", "a.b.c").await.unwrap();

        assert!(revoke(&pool, "urn:uuid:r1").await.unwrap());
        let record = get_by_jti(&pool, "urn:uuid:r1").await.unwrap().unwrap();
        assert_eq!(record.status, CredentialStatus::Revoked);

        // Revoking again succeeds and changes nothing.
        assert!(revoke(&pool, "urn:uuid:r1").await.unwrap());
        let record = get_by_jti(&pool, "urn:uuid:r1").await.unwrap().unwrap();
        assert_eq!(record.status, CredentialStatus::Revoked);
    }

    #[tokio::test]
    async fn test_revoke_unknown_reports_missing() {
        let pool = test_pool().await;
        assert!(!revoke(&pool, "urn:uuid:ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_all_orders_newest_first() {
        let pool = test_pool().await;
        insert(&pool, "urn:uuid:one", "a.b.c").await.unwrap();
        insert(&pool, "urn:uuid:two", "d.e.f").await.unwrap();

        let all = list_all(&pool).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
