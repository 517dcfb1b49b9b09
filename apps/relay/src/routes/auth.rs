//! Auth routes: credential login issuing the session cookie.

use axum::extract::State;
use axum::http::header::{HeaderMap, AUTHORIZATION, SET_COOKIE};
use axum::response::{AppendHeaders, IntoResponse};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::auth::session::{self, SESSION_COOKIE, SESSION_TTL_SECS};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/login", post(login))
}

// ---------------------------------------------------------------------------
// POST /api/v1/auth/login
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub ws_url: String,
}

/// Credentials come from the JSON body or, failing that, an HTTP Basic
/// `Authorization` header.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let (username, password) = match (body.username, body.password) {
        (Some(username), Some(password)) => (username, password),
        _ => basic_credentials(&headers)
            .ok_or_else(|| ApiError::bad_request("Missing credentials"))?,
    };

    if !session::check_credentials(&state.config.users, &username, &password) {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let token = session::mint_session(&state.config.session_secret, &username)?;

    tracing::info!(user = %username, "session issued");

    let cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_TTL_SECS}"
    );
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: SESSION_TTL_SECS,
            ws_url: "/gateway".to_string(),
        }),
    ))
}

/// Decode `Authorization: Basic <base64(user:password)>`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
