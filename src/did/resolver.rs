// src/did/resolver.rs
//! Issuer DID resolution to a verification key.
//!
//! Dispatches purely on the identifier's method prefix over a strategy
//! table: adding support for a new DID method means adding one
//! `(prefix, handler)` row, nothing else. Handlers never mutate shared
//! state.
//!
//! Every current strategy, including the fallback for unrecognized
//! methods, resolves to the locally configured trusted public key. This is a
//! deliberate, documented simplification: there is no network fetch of
//! remote DID documents, and resolution of `did:ebsi:`/`did:web:` issuers
//! is NOT a cryptographic claim about on-chain or DNS state. Unknown
//! methods intentionally fall back to the local key instead of failing
//! closed; deployments that federate with real external issuers must
//! revisit that policy before trusting this resolver.

use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use thiserror::Error;

use crate::keys::key_store::{KeyError, KeyStore};

/// Resolution failure: the strategy itself could not produce a key.
///
/// An unrecognized DID method is not an error; it falls back to the local
/// trusted key.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unable to resolve a verification key for issuer '{did}': {source}")]
    UnresolvableIssuer {
        did: String,
        #[source]
        source: KeyError,
    },
}

/// One resolution strategy: maps a DID of a single method to its
/// verification key.
type Strategy = fn(&KeyStore, &str) -> Result<DecodingKey, KeyError>;

/// Prefix-dispatched strategy table. First matching prefix wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("did:ebsi:", resolve_ebsi),
    ("did:web:", resolve_web),
];

/// Maps issuer identifiers to verification keys.
pub struct DidResolver {
    /// Source of the local trusted key that every strategy currently uses
    key_store: Arc<KeyStore>,
}

impl DidResolver {
    /// Creates a resolver backed by the given key store.
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        DidResolver { key_store }
    }

    /// Resolves an issuer identifier to the key that should verify its
    /// signatures.
    ///
    /// # Errors
    /// [`ResolveError::UnresolvableIssuer`] only when the selected strategy
    /// fails (local key missing or malformed); never for an unknown method.
    pub fn resolve(&self, did: &str) -> Result<DecodingKey, ResolveError> {
        for (prefix, strategy) in STRATEGIES {
            if did.starts_with(prefix) {
                return strategy(&self.key_store, did).map_err(|source| {
                    ResolveError::UnresolvableIssuer {
                        did: did.to_string(),
                        source,
                    }
                });
            }
        }

        log::info!("DID method not recognized or local, using default key: {}", did);
        self.key_store
            .verification_key()
            .cloned()
            .map_err(|source| ResolveError::UnresolvableIssuer {
                did: did.to_string(),
                source,
            })
    }
}

/// EBSI ecosystem issuers. A real deployment would query the trusted
/// registry; here the locally registered key stands in for it.
fn resolve_ebsi(key_store: &KeyStore, did: &str) -> Result<DecodingKey, KeyError> {
    log::info!("EBSI DID detected, resolving against local trust anchor: {}", did);
    key_store.verification_key().cloned()
}

/// `did:web` issuers. A real deployment would fetch
/// `https://<domain>/.well-known/did.json`; here the local key stands in.
fn resolve_web(key_store: &KeyStore, did: &str) -> Result<DecodingKey, KeyError> {
    log::info!("Web DID detected, using cached local key: {}", did);
    key_store.verification_key().cloned()
}
