// src/services/api_server.rs
//! API Server for the credential trust system
//!
//! This module provides the JSON API over the trust engine and the ledgers.
//! It is a thin boundary: request shapes in, verdicts and records out. All
//! decisions live in the engine and the storage layer.
//!
//! The API is built using Axum and includes endpoints for:
//! - Credential issuance (issuer role)
//! - Credential verification and challenge nonces (verifier role)
//! - Credential retrieval by identifier (holder role)
//! - Revocation and ledger inspection (admin role, token-gated)
//! - Service health with a live database probe
//!
//! Trust verdicts are never encoded in the HTTP status: `/verifier/verify`
//! answers 200 with `valid: false` and a reason code. Error statuses are
//! reserved for malformed requests (400-class) and broken configuration or
//! infrastructure (500-class).

use crate::models::credential::CredentialStatus;
use crate::services::trust_engine::{IssueError, TrustEngine, Verdict};
use crate::storage::credentials::StoreError;
use crate::storage::{credentials, db, nonces};
use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;

/// Issuance TTL policy bounds (seconds): one minute to one year.
const ISSUE_TTL_RANGE: std::ops::RangeInclusive<i64> = 60..=31_536_000;
const ISSUE_TTL_DEFAULT: i64 = 3600;

/// Challenge TTL policy bounds (seconds).
const CHALLENGE_TTL_RANGE: std::ops::RangeInclusive<i64> = 5..=600;
const CHALLENGE_TTL_DEFAULT: i64 = 60;

// API request and response structures

/// Request payload for issuing a credential
#[derive(Deserialize)]
struct IssueRequest {
    /// Business claims wrapped into the credential's `vc` envelope
    #[serde(rename = "subjectClaims")]
    subject_claims: serde_json::Value,
    /// DID of the holder the credential is about
    #[serde(rename = "subjectIdentifier")]
    subject_identifier: String,
    /// Credential lifetime in seconds
    #[serde(default = "default_issue_ttl")]
    ttl: i64,
}

fn default_issue_ttl() -> i64 {
    ISSUE_TTL_DEFAULT
}

/// Response for credential issuance
#[derive(Serialize)]
struct IssueResponse {
    jti: String,
    token: String,
    claims: crate::models::claims::Claims,
}

/// Request payload for verifying a credential
#[derive(Deserialize)]
struct VerifyRequest {
    token: String,
    nonce: Option<String>,
}

/// Response for credential verification (always HTTP 200)
#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<crate::models::claims::Claims>,
}

/// Query parameters for requesting a challenge nonce
#[derive(Deserialize)]
struct ChallengeParams {
    #[serde(default = "default_challenge_ttl")]
    ttl: i64,
}

fn default_challenge_ttl() -> i64 {
    CHALLENGE_TTL_DEFAULT
}

/// Response containing a fresh challenge nonce
#[derive(Serialize)]
struct ChallengeResponse {
    nonce: String,
    #[serde(rename = "expiresAt")]
    expires_at: String,
    ttl: i64,
}

/// Response for a holder fetching their credential
#[derive(Serialize)]
struct HolderResponse {
    jti: String,
    status: &'static str,
    token: String,
}

/// Request payload for revoking a credential
#[derive(Deserialize)]
struct RevokeRequest {
    jti: String,
}

/// Response for credential revocation
#[derive(Serialize)]
struct RevokeResponse {
    status: &'static str,
    jti: String,
    #[serde(rename = "newStatus")]
    new_status: &'static str,
}

/// Query parameter carrying the admin token (browser-friendly alternative
/// to the Authorization header)
#[derive(Deserialize)]
struct AdminParams {
    token: Option<String>,
}

/// Generic error payload for 4xx/5xx responses
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// API server state containing all service dependencies
pub struct ApiServer {
    /// Credential issuance and verification engine
    engine: Arc<TrustEngine>,

    /// Ledger database handle for the read-only surfaces
    pool: SqlitePool,

    /// Shared secret for the admin endpoints; `None` blocks them all
    admin_token: Option<String>,
}

impl ApiServer {
    /// Creates a new instance of the API server
    pub fn new(engine: TrustEngine, pool: SqlitePool, admin_token: Option<String>) -> Self {
        ApiServer {
            engine: Arc::new(engine),
            pool,
            admin_token,
        }
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) {
        // Configure all API routes
        let app = Router::new()
            .route("/issuer/issue", post(Self::issue_handler))
            .route("/verifier/challenge", get(Self::challenge_handler))
            .route("/verifier/verify", post(Self::verify_handler))
            .route("/holder/:jti", get(Self::holder_handler))
            .route("/admin/revoke", post(Self::revoke_handler))
            .route("/admin/db", get(Self::admin_db_handler))
            .route("/health", get(Self::health_handler))
            .with_state(Arc::new(self.clone()));

        // Create TCP listener
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

        // Start serving requests
        axum::serve(listener, app).await.unwrap();
    }

    // =====================
    // Issuer Handlers
    // =====================

    /// Issues a new verifiable credential
    ///
    /// # Endpoint
    /// POST /issuer/issue
    ///
    /// # Responses
    /// - 200 OK: Returns jti, signed token and full claims
    /// - 400 Bad Request: TTL outside the issuance policy
    /// - 500 Internal Server Error: Key configuration or storage failure
    async fn issue_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<IssueRequest>,
    ) -> Response {
        if !ISSUE_TTL_RANGE.contains(&payload.ttl) {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!(
                    "ttl must be between {} and {} seconds",
                    ISSUE_TTL_RANGE.start(),
                    ISSUE_TTL_RANGE.end()
                ),
            );
        }

        match state
            .engine
            .issue(payload.subject_claims, &payload.subject_identifier, payload.ttl)
            .await
        {
            Ok(issued) => (
                StatusCode::OK,
                Json(IssueResponse {
                    jti: issued.jti,
                    token: issued.token,
                    claims: issued.claims,
                }),
            )
                .into_response(),
            Err(e @ IssueError::Key(_)) => {
                log::error!("issuance failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Err(IssueError::Store(StoreError::DuplicateJti(jti))) => {
                log::error!("jti collision on issuance: {}", jti);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("credential identifier collision: {}", jti),
                )
            }
            Err(e) => {
                log::error!("issuance failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    // =====================
    // Verifier Handlers
    // =====================

    /// Issues a single-use challenge nonce for anti-replay presentations
    ///
    /// # Endpoint
    /// GET /verifier/challenge?ttl=60
    ///
    /// # Responses
    /// - 200 OK: Returns nonce value, UTC expiry and echoed ttl
    /// - 400 Bad Request: TTL outside the challenge policy
    async fn challenge_handler(
        State(state): State<Arc<ApiServer>>,
        Query(params): Query<ChallengeParams>,
    ) -> Response {
        if !CHALLENGE_TTL_RANGE.contains(&params.ttl) {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!(
                    "ttl must be between {} and {} seconds",
                    CHALLENGE_TTL_RANGE.start(),
                    CHALLENGE_TTL_RANGE.end()
                ),
            );
        }

        match nonces::issue(&state.pool, params.ttl).await {
            Ok(nonce) => (
                StatusCode::OK,
                Json(ChallengeResponse {
                    nonce: nonce.value,
                    expires_at: nonce.expires_at.to_rfc3339(),
                    ttl: params.ttl,
                }),
            )
                .into_response(),
            Err(e) => {
                log::error!("challenge creation failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    /// Verifies a presented credential, optionally consuming a nonce
    ///
    /// # Endpoint
    /// POST /verifier/verify
    ///
    /// # Responses
    /// - 200 OK: Always, with `valid` plus `reason` on failure; the HTTP
    ///   status never encodes the trust verdict
    /// - 500 Internal Server Error: Database unreachable
    async fn verify_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<VerifyRequest>,
    ) -> Response {
        match state
            .engine
            .verify(&payload.token, payload.nonce.as_deref())
            .await
        {
            Ok(Verdict::Valid { claims }) => (
                StatusCode::OK,
                Json(VerifyResponse {
                    valid: true,
                    reason: None,
                    detail: None,
                    claims: Some(claims),
                }),
            )
                .into_response(),
            Ok(Verdict::Invalid { reason, detail }) => (
                StatusCode::OK,
                Json(VerifyResponse {
                    valid: false,
                    reason: Some(reason.as_str()),
                    detail,
                    claims: None,
                }),
            )
                .into_response(),
            Err(e) => {
                log::error!("verification aborted by storage failure: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    // =====================
    // Holder Handlers
    // =====================

    /// Returns a stored credential by its identifier
    ///
    /// # Endpoint
    /// GET /holder/:jti
    ///
    /// # Responses
    /// - 200 OK: Returns jti, status and signed token
    /// - 404 Not Found: Unknown credential identifier
    async fn holder_handler(
        Path(jti): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> Response {
        match credentials::get_by_jti(&state.pool, &jti).await {
            Ok(Some(record)) => (
                StatusCode::OK,
                Json(HolderResponse {
                    jti: record.jti,
                    status: record.status.as_str(),
                    token: record.token,
                }),
            )
                .into_response(),
            Ok(None) => error_response(
                StatusCode::NOT_FOUND,
                format!("credential '{}' not found", jti),
            ),
            Err(e) => {
                log::error!("holder lookup failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    // =====================
    // Admin Handlers
    // =====================

    /// Revokes a credential, permanently
    ///
    /// # Endpoint
    /// POST /admin/revoke?token=...
    ///
    /// # Responses
    /// - 200 OK: Credential exists and is now revoked (idempotent)
    /// - 401 Unauthorized: Missing or wrong admin token
    /// - 404 Not Found: Unknown credential identifier
    async fn revoke_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        Query(params): Query<AdminParams>,
        Json(payload): Json<RevokeRequest>,
    ) -> Response {
        if let Err(denied) = state.authorize_admin(&headers, params.token.as_deref()) {
            return denied;
        }

        match credentials::revoke(&state.pool, &payload.jti).await {
            Ok(true) => {
                log::info!("credential revoked by admin: jti={}", payload.jti);
                (
                    StatusCode::OK,
                    Json(RevokeResponse {
                        status: "ok",
                        jti: payload.jti,
                        new_status: CredentialStatus::Revoked.as_str(),
                    }),
                )
                    .into_response()
            }
            Ok(false) => error_response(
                StatusCode::NOT_FOUND,
                format!("credential '{}' not found", payload.jti),
            ),
            Err(e) => {
                log::error!("revocation failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    /// Dumps the raw ledger state for audit and debugging
    ///
    /// # Endpoint
    /// GET /admin/db?token=...
    ///
    /// Tokens are truncated to a snippet so the dump can be shared in logs
    /// without handing out usable credentials.
    async fn admin_db_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        Query(params): Query<AdminParams>,
    ) -> Response {
        if let Err(denied) = state.authorize_admin(&headers, params.token.as_deref()) {
            return denied;
        }

        let creds = match credentials::list_all(&state.pool).await {
            Ok(rows) => rows,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        let nonce_rows = match nonces::list_all(&state.pool).await {
            Ok(rows) => rows,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let credentials_data: Vec<serde_json::Value> = creds
            .iter()
            .map(|c| {
                json!({
                    "jti": c.jti,
                    "status": c.status.as_str(),
                    "created_at": c.created_at.to_rfc3339(),
                    "token_snippet": format!("{}...", &c.token[..c.token.len().min(30)]),
                })
            })
            .collect();

        let nonces_data: Vec<serde_json::Value> = nonce_rows
            .iter()
            .map(|n| {
                json!({
                    "value": n.value,
                    "expires_at": n.expires_at.to_rfc3339(),
                    "consumed_at": n.consumed_at.map(|t| t.to_rfc3339()),
                })
            })
            .collect();

        (
            StatusCode::OK,
            Json(json!({
                "summary": {
                    "total_credentials": credentials_data.len(),
                    "total_nonces": nonces_data.len(),
                },
                "credentials": credentials_data,
                "nonces": nonces_data,
            })),
        )
            .into_response()
    }

    // =====================
    // Health
    // =====================

    /// Health probe that exercises a real database round trip
    ///
    /// # Endpoint
    /// GET /health
    async fn health_handler(State(state): State<Arc<ApiServer>>) -> Response {
        match db::ping(&state.pool).await {
            Ok(()) => (
                StatusCode::OK,
                Json(json!({"status": "ok", "db": "connected"})),
            )
                .into_response(),
            Err(e) => (
                StatusCode::OK,
                Json(json!({"status": "error", "db_error": e.to_string()})),
            )
                .into_response(),
        }
    }

    /// Checks admin access via `?token=` query parameter or
    /// `Authorization: Bearer` header.
    ///
    /// With no `ADMIN_TOKEN` configured every admin request is refused:
    /// an unset secret fails closed.
    fn authorize_admin(
        &self,
        headers: &HeaderMap,
        token_query: Option<&str>,
    ) -> Result<(), Response> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ADMIN_TOKEN is not configured".to_string(),
            ));
        };

        if token_query == Some(expected) {
            return Ok(());
        }

        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                let (scheme, value) = v.split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| value.trim())
            });
        if bearer == Some(expected) {
            return Ok(());
        }

        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid admin credentials".to_string(),
        ))
    }
}

/// Builds a uniform JSON error response.
fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// Implement Clone for ApiServer to use with Axum's State
impl Clone for ApiServer {
    fn clone(&self) -> Self {
        ApiServer {
            engine: Arc::clone(&self.engine),
            pool: self.pool.clone(),
            admin_token: self.admin_token.clone(),
        }
    }
}
