use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::PageQuery;
use crate::db::models::Comment;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::posts::comments::{CommentCounts, CommentInput};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/posts/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/comments/{id}",
            get(get_comment).put(update_comment).delete(delete_comment),
        )
        .route("/api/comments/{id}/replies", get(list_replies))
        .route("/api/posts/{id}/comments/count", get(post_comment_counts))
        .route("/api/comments/{id}/replies/count", get(reply_count))
        .route("/api/users/{id}/comments/count", get(user_comment_count))
}

#[derive(Deserialize)]
struct UpdateCommentRequest {
    content: String,
}

#[derive(Serialize)]
struct Count {
    count: i64,
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<i64>,
    Json(input): Json<CommentInput>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = state.comments.create(post_id, user.id, &input).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    let (page, size) = state.posts.page_params(query.page, query.size);
    Ok(Json(state.comments.top_level(post_id, page, size)?))
}

async fn list_replies(
    State(state): State<AppState>,
    Path(comment_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    let (page, size) = state.posts.page_params(query.page, query.size);
    Ok(Json(state.comments.replies(comment_id, page, size)?))
}

async fn get_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<i64>,
) -> AppResult<Json<Comment>> {
    Ok(Json(state.comments.get(comment_id)?))
}

async fn update_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(comment_id): Path<i64>,
    Json(req): Json<UpdateCommentRequest>,
) -> AppResult<Json<Comment>> {
    Ok(Json(state.comments.update(comment_id, user.id, &req.content)?))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(comment_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.comments.delete(comment_id, user.id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_comment_counts(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> AppResult<Json<CommentCounts>> {
    Ok(Json(state.comments.post_counts(post_id)?))
}

async fn reply_count(
    State(state): State<AppState>,
    Path(comment_id): Path<i64>,
) -> AppResult<Json<Count>> {
    let count = state.comments.reply_count(comment_id)?;
    Ok(Json(Count { count }))
}

async fn user_comment_count(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Count>> {
    let count = state.comments.user_count(user_id)?;
    Ok(Json(Count { count }))
}
