//! Session tokens for the connection gate.
//!
//! The relay core never inspects credentials; it only needs an admit/deny
//! decision before a connection is accepted. Login exchanges a username and
//! password from the configured user table for an HS256-signed session
//! token carried in a cookie (or as a bearer token).

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Session lifetime in seconds (24 hours).
pub const SESSION_TTL_SECS: i64 = 24 * 3600;

/// Cookie the session token travels in.
pub const SESSION_COOKIE: &str = "chorus_session";

/// Claims embedded in a session JWT.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject — the username.
    pub sub: String,
    /// Issued-at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
}

/// Check credentials against the configured user table.
pub fn check_credentials(users: &HashMap<String, String>, username: &str, password: &str) -> bool {
    users
        .get(username)
        .map(|expected| expected == password)
        .unwrap_or(false)
}

/// Mint a signed session token for a user.
pub fn mint_session(secret: &str, username: &str) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: username.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + SESSION_TTL_SECS,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| {
        tracing::error!(?err, "failed to sign session token");
        ApiError::internal("Session signing failed")
    })
}

/// Validate a session token. Returns the claims on success, `None` for
/// anything invalid or expired.
pub fn verify_session(secret: &str, token: &str) -> Option<SessionClaims> {
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .ok()
}
