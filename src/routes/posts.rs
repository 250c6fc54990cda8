use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::cache::Order;
use crate::db::models::{PostDetail, PostSummary};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::posts::PostInput;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    order: Order,
    page: Option<i64>,
    size: Option<i64>,
}

#[derive(Deserialize)]
struct CreatePostRequest {
    community_id: i64,
    #[serde(flatten)]
    post: PostInput,
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<PostSummary>>> {
    let posts = state
        .posts
        .list_posts(query.order, query.page, query.size)
        .await?;
    Ok(Json(posts))
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<PostDetail>)> {
    let post = state
        .posts
        .create_post(user.id, req.community_id, &req.post)
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<PostDetail>> {
    Ok(Json(state.posts.post_detail(id).await?))
}

async fn update_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(input): Json<PostInput>,
) -> AppResult<Json<PostDetail>> {
    Ok(Json(state.posts.update_post(id, user.id, &input).await?))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.posts.delete_post(id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
