use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::models::{PostDetail, PostSummary};
use super::page_bounds;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

pub struct NewPost<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub summary: &'a str,
    pub author_id: i64,
    pub community_id: i64,
}

/// A live post with its current vote count, for rebuilding rankings.
#[derive(Debug, Clone)]
pub struct RankedPost {
    pub summary: PostSummary,
    pub votes: i64,
    pub created_at: i64,
}

const DETAIL_COLUMNS: &str = "p.id, p.title, p.content, p.summary, p.author_id, u.username,
     p.community_id, c.name, p.created_at, p.updated_at";

const SUMMARY_COLUMNS: &str =
    "p.id, p.title, p.summary, p.author_id, u.username, p.community_id, c.name";

const JOINS: &str = "FROM posts p
     JOIN users u ON u.id = p.author_id
     JOIN communities c ON c.id = p.community_id";

fn detail_from_row(row: &Row<'_>) -> rusqlite::Result<PostDetail> {
    Ok(PostDetail {
        post_id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        author_id: row.get(4)?,
        author_name: row.get(5)?,
        community_id: row.get(6)?,
        community_name: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PostSummary> {
    Ok(PostSummary {
        post_id: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        author_id: row.get(3)?,
        author_name: row.get(4)?,
        community_id: row.get(5)?,
        community_name: row.get(6)?,
    })
}

pub fn create_post(pool: &DbPool, post: &NewPost<'_>, now: i64) -> AppResult<PostDetail> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let community_exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM communities WHERE id = ?1",
        params![post.community_id],
        |r| r.get(0),
    )?;
    if !community_exists {
        return Err(AppError::BadRequest("Unknown community".into()));
    }

    tx.execute(
        "INSERT INTO posts (title, content, summary, author_id, community_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            post.title,
            post.content,
            post.summary,
            post.author_id,
            post.community_id,
            now
        ],
    )?;
    let post_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO post_vote_counts (post_id, votes) VALUES (?1, 0)",
        params![post_id],
    )?;

    let detail = tx.query_row(
        &format!("SELECT {} {} WHERE p.id = ?1", DETAIL_COLUMNS, JOINS),
        params![post_id],
        detail_from_row,
    )?;
    tx.commit()?;
    Ok(detail)
}

pub fn get_post(pool: &DbPool, post_id: i64) -> AppResult<Option<PostDetail>> {
    let conn = pool.get()?;
    let detail = conn
        .query_row(
            &format!(
                "SELECT {} {} WHERE p.id = ?1 AND p.deleted_at IS NULL",
                DETAIL_COLUMNS, JOINS
            ),
            params![post_id],
            detail_from_row,
        )
        .optional()?;
    Ok(detail)
}

/// Summaries for the given IDs, in the order requested. Deleted or unknown
/// IDs are skipped.
pub fn get_summaries(pool: &DbPool, post_ids: &[i64]) -> AppResult<Vec<PostSummary>> {
    if post_ids.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool.get()?;
    let placeholders = vec!["?"; post_ids.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} {} WHERE p.id IN ({}) AND p.deleted_at IS NULL",
        SUMMARY_COLUMNS, JOINS, placeholders
    ))?;
    let mut rows = stmt
        .query_map(params_from_iter(post_ids.iter()), summary_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.sort_by_key(|s| post_ids.iter().position(|id| *id == s.post_id));
    Ok(rows)
}

pub fn update_post(
    pool: &DbPool,
    post_id: i64,
    title: &str,
    content: &str,
    summary: &str,
    now: i64,
) -> AppResult<bool> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE posts SET title = ?2, content = ?3, summary = ?4, updated_at = ?5
         WHERE id = ?1 AND deleted_at IS NULL",
        params![post_id, title, content, summary, now],
    )?;
    Ok(updated > 0)
}

/// Logical delete. Returns false when the post was already gone.
pub fn delete_post(pool: &DbPool, post_id: i64, now: i64) -> AppResult<bool> {
    let conn = pool.get()?;
    let deleted = conn.execute(
        "UPDATE posts SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![post_id, now],
    )?;
    Ok(deleted > 0)
}

pub fn post_author(pool: &DbPool, post_id: i64) -> AppResult<Option<i64>> {
    let conn = pool.get()?;
    let author = conn
        .query_row(
            "SELECT author_id FROM posts WHERE id = ?1 AND deleted_at IS NULL",
            params![post_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(author)
}

pub fn post_created_at(pool: &DbPool, post_id: i64) -> AppResult<Option<i64>> {
    let conn = pool.get()?;
    let created = conn
        .query_row(
            "SELECT created_at FROM posts WHERE id = ?1 AND deleted_at IS NULL",
            params![post_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(created)
}

pub fn community_posts(
    pool: &DbPool,
    community_id: i64,
    page: i64,
    page_size: i64,
) -> AppResult<Vec<PostSummary>> {
    let Some((limit, offset)) = page_bounds(page, page_size) else {
        return Ok(Vec::new());
    };
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} {} WHERE p.community_id = ?1 AND p.deleted_at IS NULL
         ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3",
        SUMMARY_COLUMNS, JOINS
    ))?;
    let posts = stmt
        .query_map(params![community_id, limit, offset], summary_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(posts)
}

/// Live posts created at or after `since`, with vote counts.
pub fn ranked_since(pool: &DbPool, since: i64) -> AppResult<Vec<RankedPost>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, COALESCE(v.votes, 0), p.created_at {}
         LEFT JOIN post_vote_counts v ON v.post_id = p.id
         WHERE p.deleted_at IS NULL AND p.created_at >= ?1",
        SUMMARY_COLUMNS, JOINS
    ))?;
    let posts = stmt
        .query_map(params![since], |row| {
            Ok(RankedPost {
                summary: summary_from_row(row)?,
                votes: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(posts)
}
