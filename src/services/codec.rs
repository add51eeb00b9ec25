// src/services/codec.rs
//! Credential token encoding and decoding.
//!
//! Builds the claims payload for a new credential and signs it as an RS256
//! JWT, and parses incoming tokens in two distinct modes:
//!
//! - [`decode_unverified`] reads the payload WITHOUT touching the signature.
//!   Its only legitimate use is discovering `iss` so the right verification
//!   key can be resolved; nothing downstream of it may be trusted.
//! - [`decode_verified`] checks the signature with a resolved key, pins the
//!   algorithm to RS256 and enforces expiry with zero leeway. Its three
//!   failure kinds are distinct so callers can tell tampering from expiry.

use base64::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use uuid::Uuid;

use crate::models::claims::{Claims, SCHEMA_REF_ID, SCHEMA_REF_TYPE};

/// Signature algorithm used for every credential issued or accepted here.
pub const ALG: Algorithm = Algorithm::RS256;

/// DID method prefix whose issuers require a schema reference inside the
/// credential envelope.
const NEEDS_SCHEMA_PREFIX: &str = "did:ebsi:";

/// Decode failures, in decreasing order of interest to a verifier.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The signature does not verify under the resolved key, or the token
    /// claims a different algorithm than the one pinned here.
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// The signature verifies but the token is past its expiry.
    #[error("token has expired")]
    TokenExpired,

    /// The token is not structurally a JWT with a claims payload.
    #[error("token is malformed: {0}")]
    TokenMalformed(String),
}

/// A freshly built, not-yet-signed credential.
#[derive(Debug, Clone)]
pub struct EncodedCredential {
    /// Generated credential identifier, also present in `claims.jti`
    pub jti: String,
    /// Full claims payload ready for signing
    pub claims: Claims,
}

/// Builds the claims payload for a new credential.
///
/// Generates a fresh `urn:uuid:` identifier, stamps `iat = nbf = now` and
/// `exp = now + ttl`, and wraps the business payload into the `vc`
/// envelope. When the issuer's DID method requires a schema reference and
/// the payload carries none, a fixed `credentialSchema` object is injected.
/// That injection is the one shape change this function performs.
///
/// `ttl` is taken as-is; range policy belongs to the issuing boundary, and a
/// non-positive value simply produces an already-expired credential.
pub fn encode(
    subject_claims: serde_json::Value,
    subject_did: &str,
    ttl: i64,
    issuer_did: &str,
) -> EncodedCredential {
    let now = Utc::now().timestamp();
    let jti = format!("urn:uuid:{}", Uuid::new_v4());

    let mut vc = subject_claims;
    if issuer_did.starts_with(NEEDS_SCHEMA_PREFIX) {
        if let Some(envelope) = vc.as_object_mut() {
            envelope.entry("credentialSchema").or_insert_with(|| {
                serde_json::json!({ "id": SCHEMA_REF_ID, "type": SCHEMA_REF_TYPE })
            });
        }
    }

    let claims = Claims {
        iss: issuer_did.to_string(),
        sub: subject_did.to_string(),
        jti: Some(jti.clone()),
        nbf: now,
        iat: now,
        exp: now + ttl,
        vc,
    };

    EncodedCredential { jti, claims }
}

/// Signs a claims payload with the issuer's private key.
pub fn sign(claims: &Claims, key: &EncodingKey) -> Result<String, jsonwebtoken::errors::Error> {
    jsonwebtoken::encode(&Header::new(ALG), claims, key)
}

/// Parses a token's claims WITHOUT verifying the signature.
///
/// Splits the compact form, base64url-decodes the payload segment and
/// deserializes it. Used only to discover the issuer before key resolution;
/// never to establish trust.
pub fn decode_unverified(token: &str) -> Result<Claims, CodecError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(CodecError::TokenMalformed(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    let raw = base64::decode_config(payload, URL_SAFE_NO_PAD)
        .map_err(|e| CodecError::TokenMalformed(format!("payload is not base64url: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| CodecError::TokenMalformed(format!("payload is not a claims object: {}", e)))
}

/// Verifies a token's signature and expiry with the given key.
///
/// The algorithm is pinned to RS256 and expiry is checked against the
/// current time with zero leeway, so a token expiring at second `t` is
/// rejected from second `t + 1` on.
pub fn decode_verified(token: &str, key: &DecodingKey) -> Result<Claims, CodecError> {
    let mut validation = Validation::new(ALG);
    validation.leeway = 0;

    match jsonwebtoken::decode::<Claims>(token, key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => Err(match e.kind() {
            ErrorKind::ExpiredSignature => CodecError::TokenExpired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                CodecError::SignatureInvalid
            }
            _ => CodecError::TokenMalformed(e.to_string()),
        }),
    }
}
