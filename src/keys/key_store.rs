// src/keys/key_store.rs
//! Issuer key management for credential signing and verification.
//!
//! Loads the issuer's RSA key pair (2048-bit, PKCS8 private / SPKI public
//! PEM) and caches the parsed keys for the lifetime of the process, so the
//! disk is touched at most once per key no matter how many requests sign or
//! verify concurrently.
//!
//! Key material is located with the following precedence, per key:
//! 1. a configured value that names an existing file: read from that file
//! 2. any other configured value: treated as inline PEM bytes
//! 3. the default path (`keys/private.pem` / `keys/public.pem`)
//!
//! The store is an explicitly constructed instance owned by the caller and
//! shared by reference; there is no process-global key state.

use std::fs;
use std::path::Path;

use jsonwebtoken::{DecodingKey, EncodingKey};
use once_cell::sync::OnceCell;
use thiserror::Error;

/// Default location of the issuer private key, relative to the working
/// directory.
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "keys/private.pem";

/// Default location of the issuer public key.
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "keys/public.pem";

/// Errors raised while locating or parsing key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// No configured or default path resolved to existing key material.
    #[error("key material not found at {path}")]
    NotFound { path: String },

    /// The located bytes did not parse as an RSA key PEM.
    #[error("key material from {origin} is not a valid RSA PEM: {source}")]
    Malformed {
        origin: String,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

/// Cached issuer key pair.
///
/// Both accessors are idempotent: the first successful call parses and
/// caches the key, every later call returns the cached value. Concurrent
/// first calls are safe; the cell admits exactly one winner.
pub struct KeyStore {
    /// Configured private key override (inline PEM or path), if any
    private_source: Option<String>,
    /// Configured public key override (inline PEM or path), if any
    public_source: Option<String>,
    /// Parsed signing key, populated on first use
    signing: OnceCell<EncodingKey>,
    /// Parsed verification key, populated on first use
    verification: OnceCell<DecodingKey>,
}

impl KeyStore {
    /// Creates a store with explicit overrides for the two keys.
    ///
    /// Each override may be inline PEM text or a path to a PEM file; `None`
    /// falls back to the default path for that key.
    pub fn new(private_source: Option<String>, public_source: Option<String>) -> Self {
        KeyStore {
            private_source,
            public_source,
            signing: OnceCell::new(),
            verification: OnceCell::new(),
        }
    }

    /// Creates a store from the process configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.private_key.clone(), config.public_key.clone())
    }

    /// Returns the issuer signing key, loading and caching it on first use.
    ///
    /// # Errors
    /// - [`KeyError::NotFound`] if no path resolves to existing material
    /// - [`KeyError::Malformed`] if the bytes are not an RSA private key PEM
    pub fn signing_key(&self) -> Result<&EncodingKey, KeyError> {
        self.signing.get_or_try_init(|| {
            let (pem, origin) =
                load_material(self.private_source.as_deref(), DEFAULT_PRIVATE_KEY_PATH)?;
            EncodingKey::from_rsa_pem(&pem).map_err(|source| KeyError::Malformed { origin, source })
        })
    }

    /// Returns the local trusted verification key, loading and caching it on
    /// first use.
    ///
    /// # Errors
    /// - [`KeyError::NotFound`] if no path resolves to existing material
    /// - [`KeyError::Malformed`] if the bytes are not an RSA public key PEM
    pub fn verification_key(&self) -> Result<&DecodingKey, KeyError> {
        self.verification.get_or_try_init(|| {
            let (pem, origin) =
                load_material(self.public_source.as_deref(), DEFAULT_PUBLIC_KEY_PATH)?;
            DecodingKey::from_rsa_pem(&pem).map_err(|source| KeyError::Malformed { origin, source })
        })
    }
}

/// Resolves a configured key source to raw PEM bytes plus a description
/// of where they came from (for error messages).
fn load_material(source: Option<&str>, default_path: &str) -> Result<(Vec<u8>, String), KeyError> {
    match source {
        // Configured value pointing at an existing file: read it.
        Some(value) if Path::new(value).is_file() => {
            let bytes = fs::read(value).map_err(|_| KeyError::NotFound {
                path: value.to_string(),
            })?;
            Ok((bytes, value.to_string()))
        }
        // Any other configured value is taken as the PEM itself (CI and
        // container deployments inject keys this way).
        Some(value) => Ok((value.as_bytes().to_vec(), "inline configuration".to_string())),
        // No override: fall back to the conventional on-disk location.
        None => {
            let path = Path::new(default_path);
            if !path.is_file() {
                return Err(KeyError::NotFound {
                    path: default_path.to_string(),
                });
            }
            let bytes = fs::read(path).map_err(|_| KeyError::NotFound {
                path: default_path.to_string(),
            })?;
            Ok((bytes, default_path.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE_PEM_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/keys/private.pem");
    const PUBLIC_PEM_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/keys/public.pem");

    #[test]
    fn test_load_from_file_path() {
        let store = KeyStore::new(
            Some(PRIVATE_PEM_PATH.to_string()),
            Some(PUBLIC_PEM_PATH.to_string()),
        );
        assert!(store.signing_key().is_ok());
        assert!(store.verification_key().is_ok());
    }

    #[test]
    fn test_load_inline_pem() {
        let store = KeyStore::new(
            Some(include_str!("../../tests/keys/private.pem").to_string()),
            Some(include_str!("../../tests/keys/public.pem").to_string()),
        );
        assert!(store.signing_key().is_ok());
        assert!(store.verification_key().is_ok());
    }

    #[test]
    fn test_missing_material_is_not_found() {
        let store = KeyStore::new(Some("/nonexistent/path.pem".to_string()), None);
        // "/nonexistent/path.pem" is not a file, so it is taken as inline PEM
        // and fails to parse instead.
        assert!(matches!(
            store.signing_key(),
            Err(KeyError::Malformed { .. })
        ));

        // With no override at all, the default path is probed and reported.
        let store = KeyStore::new(None, None);
        match store.signing_key() {
            Err(KeyError::NotFound { path }) => assert_eq!(path, DEFAULT_PRIVATE_KEY_PATH),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_garbage_material_is_malformed() {
        let store = KeyStore::new(Some("not a pem at all".to_string()), None);
        assert!(matches!(
            store.signing_key(),
            Err(KeyError::Malformed { .. })
        ));
    }

    #[test]
    fn test_key_is_cached_across_calls() {
        let store = KeyStore::new(
            Some(PRIVATE_PEM_PATH.to_string()),
            Some(PUBLIC_PEM_PATH.to_string()),
        );
        let first = store.signing_key().unwrap() as *const EncodingKey;
        let second = store.signing_key().unwrap() as *const EncodingKey;
        assert_eq!(first, second, "second call must return the cached key");
    }
}
