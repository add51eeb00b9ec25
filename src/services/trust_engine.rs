// src/services/trust_engine.rs
//! Credential issuance and the verification state machine.
//!
//! The engine orchestrates the key store, the DID resolver, the codec and
//! the two ledgers. Verification runs a fixed sequence of checks and
//! returns a value-level [`Verdict`]: a failed check is an outcome, not an
//! error. Only infrastructure failures (database unreachable) and key
//! configuration problems surface as `Err`.
//!
//! ## Verification Order
//! 1. unverified parse (issuer discovery only)
//! 2. issuer key resolution
//! 3. signature + expiry check, always before any trust-state lookup; a
//!    forged token must not reach the ledgers
//! 4. jti presence
//! 5. revocation-ledger lookup
//! 6. optional nonce consumption
//!
//! The engine holds no credential or nonce state of its own: every check
//! re-reads the ledgers, so a revocation committed a millisecond ago is
//! already effective.

use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::did::resolver::DidResolver;
use crate::keys::key_store::{KeyError, KeyStore};
use crate::models::claims::Claims;
use crate::models::credential::CredentialStatus;
use crate::services::codec::{self, CodecError};
use crate::storage::credentials::{self, StoreError};
use crate::storage::nonces::{self, ConsumeOutcome};

/// Machine-readable reason codes for a failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    InvalidSignature,
    Expired,
    UnresolvableIssuer,
    Malformed,
    UnknownJti,
    Revoked,
    NonceNotFound,
    NonceUsed,
    NonceExpired,
}

impl VerdictReason {
    /// Wire representation of the reason code.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictReason::InvalidSignature => "invalid_signature",
            VerdictReason::Expired => "expired",
            VerdictReason::UnresolvableIssuer => "unresolvable_issuer",
            VerdictReason::Malformed => "malformed",
            VerdictReason::UnknownJti => "unknown_jti",
            VerdictReason::Revoked => "revoked",
            VerdictReason::NonceNotFound => "nonce_not_found",
            VerdictReason::NonceUsed => "nonce_used",
            VerdictReason::NonceExpired => "nonce_expired",
        }
    }
}

/// Terminal state of one verification run.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Every check passed; the verified claims are returned to the caller.
    Valid { claims: Claims },
    /// A check failed. `detail` carries diagnostic context for the caller;
    /// `reason` is the stable machine-readable code.
    Invalid {
        reason: VerdictReason,
        detail: Option<String>,
    },
}

impl Verdict {
    fn invalid(reason: VerdictReason, detail: impl Into<String>) -> Self {
        Verdict::Invalid {
            reason,
            detail: Some(detail.into()),
        }
    }

    /// Whether this verdict is `Valid`.
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid { .. })
    }
}

/// A successfully issued credential, as handed back to the issuer boundary.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    /// Unique credential identifier
    pub jti: String,
    /// Signed compact token
    pub token: String,
    /// Full claims payload that was signed
    pub claims: Claims,
}

/// Issuance failures.
///
/// Key problems are configuration-class (the deployment is broken, not the
/// request); everything else is infrastructure.
#[derive(Debug, Error)]
pub enum IssueError {
    /// Signing key missing or unparseable.
    #[error("issuer key configuration incomplete: {0}")]
    Key(#[from] KeyError),

    /// Signing failed (claims not serializable or RSA failure).
    #[error("failed to sign credential: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),

    /// Generated jti collided with an existing credential.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Orchestrates issuance and verification over the shared components.
pub struct TrustEngine {
    /// Issuer key pair (signing + local verification fallback)
    key_store: Arc<KeyStore>,
    /// Maps issuer DIDs to verification keys
    resolver: DidResolver,
    /// Ledger database handle
    pool: SqlitePool,
    /// Issuer DID stamped into credentials whose payload names none
    default_issuer: String,
}

impl TrustEngine {
    /// Creates an engine over the given components.
    pub fn new(
        key_store: Arc<KeyStore>,
        resolver: DidResolver,
        pool: SqlitePool,
        default_issuer: String,
    ) -> Self {
        TrustEngine {
            key_store,
            resolver,
            pool,
            default_issuer,
        }
    }

    /// Issues a signed credential over the given subject claims.
    ///
    /// The issuer DID is taken from the payload's `issuer` field when
    /// present, otherwise from the configured default. The token is only
    /// returned once the ledger insert has committed; a ledger failure
    /// means the credential was never issued.
    ///
    /// `ttl` is applied as-is; range policy is enforced at the API boundary.
    pub async fn issue(
        &self,
        subject_claims: serde_json::Value,
        subject_did: &str,
        ttl: i64,
    ) -> Result<IssuedCredential, IssueError> {
        let issuer = subject_claims
            .get("issuer")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&self.default_issuer)
            .to_string();

        let encoded = codec::encode(subject_claims, subject_did, ttl, &issuer);
        let key = self.key_store.signing_key()?;
        let token = codec::sign(&encoded.claims, key)?;

        credentials::insert(&self.pool, &encoded.jti, &token).await?;

        log::info!(
            "credential issued: jti={} iss={} sub={} ttl={}s",
            encoded.jti,
            issuer,
            subject_did,
            ttl
        );

        Ok(IssuedCredential {
            jti: encoded.jti,
            token,
            claims: encoded.claims,
        })
    }

    /// Runs the verification state machine over a presented token.
    ///
    /// Never fails on account of the token itself: every trust defect maps
    /// to `Verdict::Invalid` with a reason code. `Err` is reserved for the
    /// database being unreachable.
    pub async fn verify(
        &self,
        token: &str,
        nonce: Option<&str>,
    ) -> Result<Verdict, sqlx::Error> {
        // 1. Structural parse, signature not yet checked: the only purpose
        //    is learning who claims to have signed this.
        let unverified = match codec::decode_unverified(token) {
            Ok(claims) => claims,
            Err(e) => return Ok(Verdict::invalid(VerdictReason::Malformed, e.to_string())),
        };

        // 2. Resolve the claimed issuer to a verification key.
        let key = match self.resolver.resolve(&unverified.iss) {
            Ok(key) => key,
            Err(e) => {
                return Ok(Verdict::invalid(
                    VerdictReason::UnresolvableIssuer,
                    e.to_string(),
                ))
            }
        };

        // 3. Cryptographic verification. Nothing below runs for a token
        //    that fails here.
        let claims = match codec::decode_verified(token, &key) {
            Ok(claims) => claims,
            Err(CodecError::SignatureInvalid) => {
                return Ok(Verdict::invalid(
                    VerdictReason::InvalidSignature,
                    "signature check failed",
                ))
            }
            Err(CodecError::TokenExpired) => {
                return Ok(Verdict::invalid(VerdictReason::Expired, "token past exp"))
            }
            Err(e @ CodecError::TokenMalformed(_)) => {
                return Ok(Verdict::invalid(VerdictReason::Malformed, e.to_string()))
            }
        };

        // 4. A credential we cannot look up is a credential we cannot vouch
        //    for.
        let Some(jti) = claims.jti.as_deref().filter(|j| !j.is_empty()) else {
            return Ok(Verdict::invalid(VerdictReason::Malformed, "no-jti"));
        };

        // 5. Revocation state, read fresh from the ledger.
        let Some(record) = credentials::get_by_jti(&self.pool, jti).await? else {
            return Ok(Verdict::invalid(
                VerdictReason::UnknownJti,
                format!("credential '{}' was not issued by this system", jti),
            ));
        };
        if record.status != CredentialStatus::Valid {
            log::info!("rejected revoked credential: jti={}", jti);
            return Ok(Verdict::invalid(
                VerdictReason::Revoked,
                format!("credential '{}' is revoked", jti),
            ));
        }

        // 6. Anti-replay: spend the presented nonce, at most once ever.
        if let Some(value) = nonce {
            match nonces::consume(&self.pool, value).await? {
                ConsumeOutcome::Consumed => {}
                ConsumeOutcome::NotFound => {
                    return Ok(Verdict::invalid(VerdictReason::NonceNotFound, "not_found"))
                }
                ConsumeOutcome::AlreadyUsed { consumed_at } => {
                    let detail = match consumed_at {
                        Some(at) => format!("already_used at {}", at.to_rfc3339()),
                        None => "already_used".to_string(),
                    };
                    return Ok(Verdict::invalid(VerdictReason::NonceUsed, detail));
                }
                ConsumeOutcome::Expired => {
                    return Ok(Verdict::invalid(VerdictReason::NonceExpired, "expired"))
                }
            }
        }

        log::info!("credential verified: jti={} iss={}", jti, claims.iss);
        Ok(Verdict::Valid { claims })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::test_pool;

    const PRIVATE_PEM_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/keys/private.pem");
    const PUBLIC_PEM_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/keys/public.pem");

    async fn engine() -> TrustEngine {
        let key_store = Arc::new(KeyStore::new(
            Some(PRIVATE_PEM_PATH.to_string()),
            Some(PUBLIC_PEM_PATH.to_string()),
        ));
        let resolver = DidResolver::new(key_store.clone());
        TrustEngine::new(
            key_store,
            resolver,
            test_pool().await,
            "did:web:demo".to_string(),
        )
    }

    fn reason_of(verdict: &Verdict) -> VerdictReason {
        match verdict {
            Verdict::Invalid { reason, .. } => *reason,
            Verdict::Valid { .. } => panic!("expected an invalid verdict"),
        }
    }

    #[tokio::test]
    async fn test_issue_then_verify_round_trip() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "123"}), "did:example:runner", 3600)
            .await
            .unwrap();

        assert_eq!(issued.token.split('.').count(), 3);
        assert!(!issued.jti.is_empty());

        let verdict = engine.verify(&issued.token, None).await.unwrap();
        match verdict {
            Verdict::Valid { claims } => {
                assert_eq!(claims.sub, "did:example:runner");
                assert_eq!(claims.vc["bib"], "123");
            }
            Verdict::Invalid { reason, detail } => {
                panic!("expected valid, got {:?} ({:?})", reason, detail)
            }
        }
    }

    #[tokio::test]
    async fn test_tampered_token_is_invalid_signature() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "1"}), "did:web:h", 3600)
            .await
            .unwrap();

        let parts: Vec<&str> = issued.token.split('.').collect();
        let sig = parts[2];
        let flipped = if sig.as_bytes()[0] == b'A' { 'B' } else { 'A' };
        let tampered = format!("{}.{}.{}{}", parts[0], parts[1], flipped, &sig[1..]);

        let verdict = engine.verify(&tampered, None).await.unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::InvalidSignature);
    }

    #[tokio::test]
    async fn test_expired_token_is_expired() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "1"}), "did:web:h", -1)
            .await
            .unwrap();

        let verdict = engine.verify(&issued.token, None).await.unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::Expired);
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let engine = engine().await;
        let verdict = engine.verify("definitely not a jwt", None).await.unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::Malformed);
    }

    #[tokio::test]
    async fn test_unknown_jti_is_rejected() {
        let engine = engine().await;

        // Correctly signed token whose jti never touched the ledger.
        let encoded = codec::encode(
            serde_json::json!({"bib": "7"}),
            "did:web:stranger",
            3600,
            "did:web:demo",
        );
        let token = codec::sign(&encoded.claims, engine.key_store.signing_key().unwrap()).unwrap();

        let verdict = engine.verify(&token, None).await.unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::UnknownJti);
    }

    #[tokio::test]
    async fn test_token_without_jti_is_malformed() {
        let engine = engine().await;

        let mut encoded = codec::encode(
            serde_json::json!({}),
            "did:web:holder",
            3600,
            "did:web:demo",
        );
        encoded.claims.jti = None;
        let token = codec::sign(&encoded.claims, engine.key_store.signing_key().unwrap()).unwrap();

        let verdict = engine.verify(&token, None).await.unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::Malformed);
    }

    #[tokio::test]
    async fn test_revocation_is_permanent() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "2"}), "did:web:h", 3600)
            .await
            .unwrap();

        assert!(credentials::revoke(&engine.pool, &issued.jti).await.unwrap());

        let first = engine.verify(&issued.token, None).await.unwrap();
        assert_eq!(reason_of(&first), VerdictReason::Revoked);

        // Re-verifying gives the same answer; reads do not disturb state.
        let second = engine.verify(&issued.token, None).await.unwrap();
        assert_eq!(reason_of(&second), VerdictReason::Revoked);
    }

    #[tokio::test]
    async fn test_nonce_is_single_use_across_verifications() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "3"}), "did:web:h", 3600)
            .await
            .unwrap();
        let nonce = nonces::issue(&engine.pool, 60).await.unwrap();

        let first = engine
            .verify(&issued.token, Some(&nonce.value))
            .await
            .unwrap();
        assert!(first.is_valid());

        let second = engine
            .verify(&issued.token, Some(&nonce.value))
            .await
            .unwrap();
        assert_eq!(reason_of(&second), VerdictReason::NonceUsed);
    }

    #[tokio::test]
    async fn test_unknown_nonce_is_rejected() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "4"}), "did:web:h", 3600)
            .await
            .unwrap();

        let verdict = engine
            .verify(&issued.token, Some("never-issued"))
            .await
            .unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::NonceNotFound);
    }

    #[tokio::test]
    async fn test_expired_nonce_is_rejected() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "5"}), "did:web:h", 3600)
            .await
            .unwrap();
        let nonce = nonces::issue(&engine.pool, -6).await.unwrap();

        let verdict = engine
            .verify(&issued.token, Some(&nonce.value))
            .await
            .unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::NonceExpired);
    }

    #[tokio::test]
    async fn test_revoked_credential_does_not_burn_the_nonce() {
        let engine = engine().await;
        let issued = engine
            .issue(serde_json::json!({"bib": "6"}), "did:web:h", 3600)
            .await
            .unwrap();
        let nonce = nonces::issue(&engine.pool, 60).await.unwrap();

        credentials::revoke(&engine.pool, &issued.jti).await.unwrap();
        let verdict = engine
            .verify(&issued.token, Some(&nonce.value))
            .await
            .unwrap();
        assert_eq!(reason_of(&verdict), VerdictReason::Revoked);

        // The revocation check precedes nonce consumption, so the challenge
        // is still spendable by a later, legitimate presentation.
        assert_eq!(
            nonces::consume(&engine.pool, &nonce.value).await.unwrap(),
            ConsumeOutcome::Consumed
        );
    }

    #[tokio::test]
    async fn test_ebsi_issuer_resolves_and_verifies() {
        let engine = engine().await;
        let issued = engine
            .issue(
                serde_json::json!({
                    "issuer": "did:ebsi:zx812389123",
                    "credentialSubject": {"achievement": "Hyrox Finisher"}
                }),
                "did:ebsi:athlete456",
                3600,
            )
            .await
            .unwrap();

        assert_eq!(issued.claims.iss, "did:ebsi:zx812389123");
        assert_eq!(
            issued.claims.vc["credentialSchema"]["type"],
            "JsonSchemaValidator2018"
        );

        let verdict = engine.verify(&issued.token, None).await.unwrap();
        assert!(verdict.is_valid());
    }
}
