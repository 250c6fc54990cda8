use rusqlite::{params, OptionalExtension, Row};

use super::models::Comment;
use super::page_bounds;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

pub struct NewComment<'a> {
    pub post_id: i64,
    pub author_id: i64,
    pub content: &'a str,
    /// The comment being replied to, if any.
    pub reply_id: Option<i64>,
}

const COLUMNS: &str = "c.id, c.post_id, c.author_id, u.username, c.content, c.reply_id,
     c.parent_id, c.vote_count, c.created_at, c.updated_at";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        comment_id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        reply_id: row.get(5)?,
        parent_id: row.get(6)?,
        vote_count: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Store a comment. A reply inherits its thread root: the replied-to
/// comment's `parent_id`, or the replied-to comment itself when it is top
/// level.
pub fn create_comment(pool: &DbPool, comment: &NewComment<'_>, now: i64) -> AppResult<Comment> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let post_live: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM posts WHERE id = ?1 AND deleted_at IS NULL",
        params![comment.post_id],
        |r| r.get(0),
    )?;
    if !post_live {
        return Err(AppError::NotFound);
    }

    let parent_id = match comment.reply_id {
        None => None,
        Some(reply_id) => {
            let target: Option<(i64, Option<i64>)> = tx
                .query_row(
                    "SELECT post_id, parent_id FROM comments WHERE id = ?1 AND deleted_at IS NULL",
                    params![reply_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match target {
                None => return Err(AppError::BadRequest("Unknown reply target".into())),
                Some((post_id, _)) if post_id != comment.post_id => {
                    return Err(AppError::BadRequest(
                        "Reply target belongs to another post".into(),
                    ))
                }
                Some((_, parent)) => Some(parent.unwrap_or(reply_id)),
            }
        }
    };

    tx.execute(
        "INSERT INTO comments (post_id, author_id, content, reply_id, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            comment.post_id,
            comment.author_id,
            comment.content,
            comment.reply_id,
            parent_id,
            now
        ],
    )?;
    let id = tx.last_insert_rowid();
    let created = tx.query_row(
        &format!(
            "SELECT {} FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = ?1",
            COLUMNS
        ),
        params![id],
        comment_from_row,
    )?;
    tx.commit()?;
    Ok(created)
}

pub fn get_comment(pool: &DbPool, comment_id: i64) -> AppResult<Option<Comment>> {
    let conn = pool.get()?;
    let comment = conn
        .query_row(
            &format!(
                "SELECT {} FROM comments c JOIN users u ON u.id = c.author_id
                 WHERE c.id = ?1 AND c.deleted_at IS NULL",
                COLUMNS
            ),
            params![comment_id],
            comment_from_row,
        )
        .optional()?;
    Ok(comment)
}

/// Top-level comments of a post, oldest first.
pub fn top_comments(
    pool: &DbPool,
    post_id: i64,
    page: i64,
    page_size: i64,
) -> AppResult<Vec<Comment>> {
    let Some((limit, offset)) = page_bounds(page, page_size) else {
        return Ok(Vec::new());
    };
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c JOIN users u ON u.id = c.author_id
         WHERE c.post_id = ?1 AND c.parent_id IS NULL AND c.deleted_at IS NULL
         ORDER BY c.created_at, c.id LIMIT ?2 OFFSET ?3",
        COLUMNS
    ))?;
    let comments = stmt
        .query_map(params![post_id, limit, offset], comment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

/// Every reply in the thread rooted at `root_id`, oldest first.
pub fn replies(pool: &DbPool, root_id: i64, page: i64, page_size: i64) -> AppResult<Vec<Comment>> {
    let Some((limit, offset)) = page_bounds(page, page_size) else {
        return Ok(Vec::new());
    };
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c JOIN users u ON u.id = c.author_id
         WHERE c.parent_id = ?1 AND c.deleted_at IS NULL
         ORDER BY c.created_at, c.id LIMIT ?2 OFFSET ?3",
        COLUMNS
    ))?;
    let comments = stmt
        .query_map(params![root_id, limit, offset], comment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

pub fn update_comment(pool: &DbPool, comment_id: i64, content: &str, now: i64) -> AppResult<bool> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1 AND deleted_at IS NULL",
        params![comment_id, content, now],
    )?;
    Ok(changed > 0)
}

/// Soft-delete a comment along with every comment that hangs off it: the
/// rest of its thread when it is a root, and direct replies to it.
/// Returns how many comments were hidden.
pub fn delete_comment(pool: &DbPool, comment_id: i64, now: i64) -> AppResult<usize> {
    let conn = pool.get()?;
    let hidden = conn.execute(
        "UPDATE comments SET deleted_at = ?2
         WHERE deleted_at IS NULL AND (id = ?1 OR parent_id = ?1 OR reply_id = ?1)",
        params![comment_id, now],
    )?;
    Ok(hidden)
}

pub fn comment_author(pool: &DbPool, comment_id: i64) -> AppResult<Option<i64>> {
    let conn = pool.get()?;
    let author = conn
        .query_row(
            "SELECT author_id FROM comments WHERE id = ?1 AND deleted_at IS NULL",
            params![comment_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(author)
}

/// Live comments on a post: all of them, and top-level only.
pub fn post_comment_counts(pool: &DbPool, post_id: i64) -> AppResult<(i64, i64)> {
    let conn = pool.get()?;
    let counts = conn.query_row(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE parent_id IS NULL) FROM comments
         WHERE post_id = ?1 AND deleted_at IS NULL",
        params![post_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(counts)
}

/// Live replies in the thread rooted at `root_id`.
pub fn reply_count(pool: &DbPool, root_id: i64) -> AppResult<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE parent_id = ?1 AND deleted_at IS NULL",
        params![root_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn user_comment_count(pool: &DbPool, user_id: i64) -> AppResult<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE author_id = ?1 AND deleted_at IS NULL",
        params![user_id],
        |r| r.get(0),
    )?;
    Ok(count)
}
