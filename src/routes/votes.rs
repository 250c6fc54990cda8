use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{IdsQuery, PageQuery};
use crate::db::models::{VoteCount, VoteStatus, Voter};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::pipeline::{SubjectKind, VoteIntent, VoteValue};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/posts/{id}/votes",
            post(vote_post).delete(unvote_post).get(post_votes),
        )
        .route(
            "/api/comments/{id}/votes",
            post(vote_comment).delete(unvote_comment),
        )
        .route("/api/posts/{id}/voters", get(post_voters))
        .route("/api/votes/posts", get(batch_post_votes))
        .route("/api/me/votes", get(my_votes))
        .route("/api/me/votes/check", get(check_votes))
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    #[serde(default = "default_kind")]
    kind: SubjectKind,
    #[serde(default)]
    ids: String,
}

fn default_kind() -> SubjectKind {
    SubjectKind::Post
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoteRequest {
    pub vote: VoteValue,
}

async fn vote_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<VoteRequest>,
) -> StatusCode {
    submit(&state, SubjectKind::Post, id, user.id, req.vote).await
}

async fn unvote_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> StatusCode {
    submit(&state, SubjectKind::Post, id, user.id, VoteValue::Neutral).await
}

async fn vote_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<VoteRequest>,
) -> StatusCode {
    submit(&state, SubjectKind::Comment, id, user.id, req.vote).await
}

async fn unvote_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> StatusCode {
    submit(&state, SubjectKind::Comment, id, user.id, VoteValue::Neutral).await
}

async fn post_votes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<VoteCount>> {
    let votes = state.posts.vote_count(SubjectKind::Post, id).await?;
    Ok(Json(VoteCount {
        subject_id: id,
        votes,
    }))
}

async fn post_voters(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Voter>>> {
    Ok(Json(state.posts.voters(id, query.page, query.size)?))
}

async fn batch_post_votes(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> AppResult<Json<Vec<VoteCount>>> {
    Ok(Json(state.posts.vote_counts(&query.parse()?)?))
}

/// IDs of live posts the caller has upvoted, most recent first.
async fn my_votes(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<i64>>> {
    Ok(Json(state.posts.voted_posts(user.id, query.page, query.size)?))
}

async fn check_votes(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<CheckQuery>,
) -> AppResult<Json<Vec<VoteStatus>>> {
    let ids = IdsQuery { ids: query.ids }.parse()?;
    Ok(Json(state.posts.voted_among(query.kind, user.id, &ids)?))
}

/// Enqueue and answer 202 without waiting for the vote to be applied. A
/// failed enqueue is logged; the caller still sees 202.
async fn submit(
    state: &AppState,
    subject_kind: SubjectKind,
    subject_id: i64,
    user_id: i64,
    vote: VoteValue,
) -> StatusCode {
    let intent = VoteIntent {
        subject_id,
        subject_kind,
        user_id,
        vote,
    };
    if let Err(e) = state.votes.submit(intent).await {
        tracing::error!(subject_id, user_id, kind = subject_kind.as_str(), "Vote not enqueued: {}", e);
    }
    StatusCode::ACCEPTED
}
