use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::session;
use crate::db::users;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/auth/logout", post(logout))
}

/// Test-only routes. Mounted when AGORA_TEST_SEED is set.
pub fn seed_router() -> Router<AppState> {
    Router::new().route("/test/seed", get(test_seed))
}

/// Revoke the presented token until it would have expired anyway.
async fn logout(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    state.blacklist.add(&user.token, user.expires_at).await?;
    session::delete_session(&state.db, &user.token)?;
    tracing::info!(user_id = user.id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SeedQuery {
    username: Option<String>,
}

#[derive(Serialize)]
struct SeedResponse {
    user_id: i64,
    username: String,
    token: String,
}

/// Create (or reuse) a user and open a session for it.
async fn test_seed(
    State(state): State<AppState>,
    Query(query): Query<SeedQuery>,
) -> AppResult<Json<SeedResponse>> {
    let username = query.username.unwrap_or_else(|| "testuser".to_string());
    if username.trim().is_empty() {
        return Err(AppError::BadRequest("Username is required".into()));
    }
    let user = users::ensure_user(&state.db, username.trim())?;
    let (token, _) = session::create_session(&state.db, user.id, state.config.auth.session_hours)?;
    Ok(Json(SeedResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}
