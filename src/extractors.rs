use axum::extract::{FromRequestParts, Query};
use axum::http::header;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    /// The session token the request presented.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Extractor that requires authentication.
/// Returns 401 if the token is missing, expired, unknown or blacklisted.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts).ok_or(AppError::Unauthorized)?;

        // Logged-out tokens are rejected without touching the database.
        if state.blacklist.contains(&token).await? {
            return Err(AppError::Unauthorized);
        }

        let session = auth::find_session(&state.db, &token)?.ok_or(AppError::Unauthorized)?;
        Ok(CurrentUser {
            id: session.user_id,
            username: session.username,
            is_admin: session.is_admin,
            token,
            expires_at: session.expires_at,
        })
    }
}

/// Bearer token from the `Authorization` header, falling back to a `token`
/// query parameter for websocket upgrades, which cannot set headers from a
/// browser.
fn extract_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|t| !t.is_empty())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str, auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_header_wins() {
        let p = parts("/ws?token=query", Some("Bearer header"));
        assert_eq!(extract_token(&p).as_deref(), Some("header"));
    }

    #[test]
    fn query_token_is_accepted() {
        let p = parts("/ws?x=1&token=abc", None);
        assert_eq!(extract_token(&p).as_deref(), Some("abc"));
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let p = parts("/ws?token=a%2Bb%3D&x=1", None);
        assert_eq!(extract_token(&p).as_deref(), Some("a+b="));
    }

    #[test]
    fn missing_or_malformed_tokens() {
        assert!(extract_token(&parts("/api/posts", None)).is_none());
        assert!(extract_token(&parts("/api/posts", Some("Basic abc"))).is_none());
        assert!(extract_token(&parts("/ws?token=", None)).is_none());
    }
}
