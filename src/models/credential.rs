// src/models/credential.rs
//! Persisted credential record and its status model.

use chrono::{DateTime, Utc};

/// Lifecycle status of an issued credential.
///
/// The only legal transition is from `Valid` to `Revoked`; revocation is
/// permanent and never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Credential is live and passes the revocation check.
    Valid,
    /// Credential has been revoked; verification fails from then on.
    Revoked,
}

impl CredentialStatus {
    /// Database representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Valid => "valid",
            CredentialStatus::Revoked => "revoked",
        }
    }

    /// Parses the stored status string. Anything that is not literally
    /// `valid` is treated as revoked, so an unexpected value can never widen
    /// trust.
    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => CredentialStatus::Valid,
            "revoked" => CredentialStatus::Revoked,
            other => {
                log::warn!("unknown credential status '{}' in database, treating as revoked", other);
                CredentialStatus::Revoked
            }
        }
    }
}

/// One row of the credential ledger.
///
/// `jti` never changes after insertion and the signed `token` is immutable;
/// only `status` is ever updated. `created_at` is assigned by the ledger at
/// insert time, never by the caller.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    /// Unique credential identifier (primary key)
    pub jti: String,

    /// Full signed token as handed to the holder
    pub token: String,

    /// Current lifecycle status
    pub status: CredentialStatus,

    /// UTC insertion timestamp
    pub created_at: DateTime<Utc>,
}
