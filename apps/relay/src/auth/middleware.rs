//! Session extraction for gated endpoints.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::session::{self, SESSION_COOKIE};
use crate::AppState;

/// Authenticated user extracted from the session cookie or an
/// `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub username: String,
}

/// Rejection returned when the session token is missing or invalid.
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(AuthError {
            message: "Missing session token",
        })?;

        let claims =
            session::verify_session(&state.config.session_secret, &token).ok_or(AuthError {
                message: "Invalid or expired session",
            })?;

        Ok(SessionUser {
            username: claims.sub,
        })
    }
}

/// Pull the session token out of the bearer header or the cookie jar.
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }

    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        cookie
            .trim()
            .strip_prefix(SESSION_COOKIE)?
            .strip_prefix('=')
            .map(|v| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        headers.insert(
            COOKIE,
            HeaderValue::from_static("chorus_session=from-cookie"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok123"));
    }

    #[test]
    fn cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; chorus_session=tok456; lang=fr"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok456"));
    }

    #[test]
    fn missing_token_is_none() {
        let headers = HeaderMap::new();
        assert!(session_token(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark"));
        assert!(session_token(&headers).is_none());
    }
}
