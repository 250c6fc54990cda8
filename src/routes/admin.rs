use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::pipeline::DeadLetter;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/dead-letters", get(dead_letters))
}

#[derive(Serialize)]
struct PipelineStatus {
    backlog: usize,
    pending_invalidations: usize,
    online: usize,
    dead_letters: Vec<DeadLetter>,
}

async fn dead_letters(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<PipelineStatus>> {
    if !user.is_admin {
        return Err(AppError::Forbidden);
    }
    Ok(Json(PipelineStatus {
        backlog: state.votes.backlog(),
        pending_invalidations: state.posts.pending_invalidations(),
        online: state.hub.online_count().await,
        dead_letters: state.dead_letters.snapshot().await,
    }))
}
