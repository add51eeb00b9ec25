// src/config.rs
//! Process configuration loaded from the environment.
//!
//! All tunables live in environment variables (optionally supplied through a
//! `.env` file) and are read exactly once at startup into an explicit
//! [`Config`] value that is handed to the components that need it. Nothing
//! in the crate reads the environment after startup.
//!
//! ## Environment Variables
//! - `VC_PRIV`: issuer private key, inline PEM or a path to a PEM file
//! - `VC_PUB`: issuer public key, inline PEM or a path to a PEM file
//! - `VC_ISS`: default issuer DID for new credentials (default `did:web:demo`)
//! - `DATABASE_URL`: sqlx connection string (default `sqlite:dap.db`)
//! - `ADMIN_TOKEN`: shared secret gating the admin endpoints
//! - `BIND_ADDR`: listen address (default `127.0.0.1:3000`)

use std::env;
use std::net::SocketAddr;

/// Default issuer identifier used when a credential payload names none.
pub const DEFAULT_ISSUER_DID: &str = "did:web:demo";

/// Runtime configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// sqlx connection string for the credential/nonce database
    pub database_url: String,
    /// Issuer private key override (inline PEM or file path)
    pub private_key: Option<String>,
    /// Issuer public key override (inline PEM or file path)
    pub public_key: Option<String>,
    /// Issuer DID stamped into credentials that do not name one
    pub issuer_did: String,
    /// Shared secret for the admin endpoints; unset blocks them entirely
    pub admin_token: Option<String>,
    /// Socket address the API server binds to
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Reads the full configuration from the process environment.
    ///
    /// # Panics
    /// Panics if `BIND_ADDR` is set but does not parse as a socket address;
    /// a bad listen address is unrecoverable at startup.
    pub fn from_env() -> Self {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .expect("BIND_ADDR must be a valid socket address, e.g. 127.0.0.1:3000");

        Config {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:dap.db".to_string()),
            private_key: env::var("VC_PRIV").ok().filter(|v| !v.is_empty()),
            public_key: env::var("VC_PUB").ok().filter(|v| !v.is_empty()),
            issuer_did: env::var("VC_ISS").unwrap_or_else(|_| DEFAULT_ISSUER_DID.to_string()),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|v| !v.is_empty()),
            bind_addr,
        }
    }
}
