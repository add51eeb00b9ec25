// src/main.rs

//! # Athlete Passport - Main Entry Point
//!
//! This module serves as the main entry point for the credential trust
//! system. It initializes all core components and starts the API server.
//!
//! ## Architecture Overview
//! 1. **Keys Layer**: `KeyStore` holding the issuer's RSA signing key pair
//! 2. **Identity Layer**: `DidResolver` mapping issuer DIDs to keys
//! 3. **Services Layer**: Trust engine (issue/verify) and the JSON API
//! 4. **Storage Layer**: SQLite ledgers for credentials and nonces
//!
//! ## Environment Variables
//! - `VC_PRIV` / `VC_PUB`: issuer key material (inline PEM or file path),
//!   defaulting to `keys/private.pem` / `keys/public.pem`
//! - `VC_ISS`: default issuer DID
//! - `DATABASE_URL`: ledger database (default `sqlite:dap.db`)
//! - `ADMIN_TOKEN`: shared secret for the admin endpoints
//! - `BIND_ADDR`: listen address (default `127.0.0.1:3000`)
//! - `RUST_LOG`: log filter (env_logger)

use crate::config::Config;
use crate::did::resolver::DidResolver;
use crate::keys::key_store::KeyStore;
use crate::services::api_server::ApiServer;
use crate::services::trust_engine::TrustEngine;
use dotenv::dotenv;
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod config;   // Environment configuration
mod did;      // Issuer DID resolution
mod keys;     // Signing/verification key management
mod models;   // Data structures
mod services; // Business logic and API
mod storage;  // Credential and nonce ledgers

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment configuration
/// 2. Connect the ledger database and apply migrations
/// 3. Initialize key store, resolver and trust engine
/// 4. Start API server
///
/// # Errors
/// Fails fast if the database is unreachable or migrations cannot run.
/// Missing key material does NOT abort startup; keys load lazily and
/// surface as 500-class responses on first use, so a verifier-only
/// deployment can run without the private key on disk.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    // Connect the ledger database (created on first run)
    let pool = storage::db::init_pool(&config.database_url).await?;

    // Initialize core components
    let key_store = Arc::new(KeyStore::from_config(&config));
    let resolver = DidResolver::new(Arc::clone(&key_store));
    let engine = TrustEngine::new(
        key_store,
        resolver,
        pool.clone(),
        config.issuer_did.clone(),
    );

    // Initialize API Server with all dependencies
    let api_server = ApiServer::new(engine, pool, config.admin_token.clone());

    // Start the HTTP server
    println!("API server running at http://{}", config.bind_addr);
    println!("Available endpoints:");
    println!("- POST /issuer/issue");
    println!("- GET  /verifier/challenge");
    println!("- POST /verifier/verify");
    println!("- GET  /holder/:jti");
    println!("- POST /admin/revoke");
    println!("- GET  /admin/db");
    println!("- GET  /health");

    api_server.run(config.bind_addr).await;
    Ok(())
}
