use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::PageQuery;
use crate::db::communities;
use crate::db::models::{Community, PostSummary};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/communities",
            get(list_communities).post(create_community),
        )
        .route("/api/communities/{id}", get(community_detail))
        .route("/api/communities/{id}/posts", get(community_posts))
}

#[derive(Deserialize)]
struct CreateCommunityRequest {
    name: String,
    #[serde(default)]
    introduction: String,
}

async fn list_communities(State(state): State<AppState>) -> AppResult<Json<Vec<Community>>> {
    Ok(Json(communities::list_communities(&state.db)?))
}

async fn create_community(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<CreateCommunityRequest>,
) -> AppResult<(StatusCode, Json<Community>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Community name is required".into()));
    }
    let community = communities::create_community(&state.db, name, req.introduction.trim())?;
    tracing::info!(community_id = community.community_id, "Community created");
    Ok((StatusCode::CREATED, Json(community)))
}

async fn community_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Community>> {
    let community = communities::get_community(&state.db, id)?.ok_or(AppError::NotFound)?;
    Ok(Json(community))
}

async fn community_posts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<PostSummary>>> {
    Ok(Json(state.posts.community_posts(id, query.page, query.size)?))
}
