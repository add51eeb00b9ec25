// src/models/claims.rs
//! Claims payload carried inside a credential token.
//!
//! The envelope is rigid: the registered JWT fields are a fixed struct,
//! while the `vc` member stays an open JSON object carrying each credential
//! type's business data (event, bib, name, result time, ...).

use serde::{Deserialize, Serialize};

/// Registered claims plus the verifiable-credential envelope.
///
/// All timestamps are UTC epoch seconds. The expiry invariant is
/// `exp = iat + ttl`, fixed at issuance.
///
/// # Fields
/// - `iss`: DID of the issuing entity
/// - `sub`: DID of the credential subject (the holder)
/// - `jti`: globally unique credential identifier (`urn:uuid:` form)
/// - `nbf` / `iat` / `exp`: validity window, epoch seconds
/// - `vc`: open business payload, optionally carrying a `credentialSchema`
///   reference injected at encode time
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    /// DID of the credential issuer
    /// Example: "did:web:demo"
    pub iss: String,

    /// DID of the credential subject
    /// Example: "did:example:runner"
    pub sub: String,

    /// Unique credential identifier. Optional on the wire; the engine
    /// rejects a parsed token that carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Not-before time (epoch seconds)
    pub nbf: i64,

    /// Issued-at time (epoch seconds)
    pub iat: i64,

    /// Expiry time (epoch seconds)
    pub exp: i64,

    /// Nested business-data object of the credential
    pub vc: serde_json::Value,
}

/// Schema registry entry referenced by credentials whose issuer scheme
/// requires one.
pub const SCHEMA_REF_ID: &str =
    "https://api.preprod.ebsi.eu/trusted-schemas-registry/v1/schemas/0x123...";

/// Schema validator type accompanying [`SCHEMA_REF_ID`].
pub const SCHEMA_REF_TYPE: &str = "JsonSchemaValidator2018";
