use std::collections::{HashMap, HashSet};

use rusqlite::{params, params_from_iter, OptionalExtension, Transaction, TransactionBehavior};

use super::models::{VoteCount, VoteStatus, Voter};
use super::page_bounds;
use crate::error::AppResult;
use crate::pipeline::SubjectKind;
use crate::state::DbPool;

/// What persisting one vote intent did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteEffect {
    /// A vote row was inserted or deleted and the counter moved by `delta`.
    Changed { delta: i64, count: i64 },
    /// The vote row was already in the requested state.
    Unchanged { count: i64 },
    /// The subject does not exist or was deleted.
    SubjectMissing,
}

fn subject_live(tx: &Transaction<'_>, kind: SubjectKind, subject_id: i64) -> rusqlite::Result<bool> {
    let sql = match kind {
        SubjectKind::Post => "SELECT COUNT(*) > 0 FROM posts WHERE id = ?1 AND deleted_at IS NULL",
        SubjectKind::Comment => {
            "SELECT COUNT(*) > 0 FROM comments WHERE id = ?1 AND deleted_at IS NULL"
        }
    };
    tx.query_row(sql, params![subject_id], |r| r.get(0))
}

fn read_count(tx: &Transaction<'_>, kind: SubjectKind, subject_id: i64) -> rusqlite::Result<i64> {
    let sql = match kind {
        SubjectKind::Post => "SELECT votes FROM post_vote_counts WHERE post_id = ?1",
        SubjectKind::Comment => "SELECT vote_count FROM comments WHERE id = ?1",
    };
    Ok(tx
        .query_row(sql, params![subject_id], |r| r.get(0))
        .optional()?
        .unwrap_or(0))
}

/// Insert (`upvote`) or remove the user's vote on a subject, moving the
/// stored counter in the same transaction.
pub fn apply_vote(
    pool: &DbPool,
    kind: SubjectKind,
    subject_id: i64,
    user_id: i64,
    upvote: bool,
    now: i64,
) -> AppResult<VoteEffect> {
    let mut conn = pool.get()?;
    // Take the write lock up front: a deferred transaction that reads first
    // cannot upgrade while another writer holds the WAL, and busy_timeout
    // does not retry that case.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if !subject_live(&tx, kind, subject_id)? {
        return Ok(VoteEffect::SubjectMissing);
    }

    let changed = match (kind, upvote) {
        (SubjectKind::Post, true) => tx.execute(
            "INSERT OR IGNORE INTO post_votes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![subject_id, user_id, now],
        )?,
        (SubjectKind::Post, false) => tx.execute(
            "DELETE FROM post_votes WHERE post_id = ?1 AND user_id = ?2",
            params![subject_id, user_id],
        )?,
        (SubjectKind::Comment, true) => tx.execute(
            "INSERT OR IGNORE INTO comment_votes (comment_id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![subject_id, user_id, now],
        )?,
        (SubjectKind::Comment, false) => tx.execute(
            "DELETE FROM comment_votes WHERE comment_id = ?1 AND user_id = ?2",
            params![subject_id, user_id],
        )?,
    };

    if changed == 0 {
        let count = read_count(&tx, kind, subject_id)?;
        tx.commit()?;
        return Ok(VoteEffect::Unchanged { count });
    }

    let delta: i64 = if upvote { 1 } else { -1 };
    match kind {
        SubjectKind::Post => tx.execute(
            "INSERT INTO post_vote_counts (post_id, votes) VALUES (?1, ?2)
             ON CONFLICT(post_id) DO UPDATE SET votes = MAX(votes + ?2, 0)",
            params![subject_id, delta],
        )?,
        SubjectKind::Comment => tx.execute(
            "UPDATE comments SET vote_count = MAX(vote_count + ?2, 0) WHERE id = ?1",
            params![subject_id, delta],
        )?,
    };
    let count = read_count(&tx, kind, subject_id)?;
    tx.commit()?;

    Ok(VoteEffect::Changed { delta, count })
}

pub fn vote_count(pool: &DbPool, kind: SubjectKind, subject_id: i64) -> AppResult<Option<i64>> {
    let conn = pool.get()?;
    let sql = match kind {
        SubjectKind::Post => {
            "SELECT COALESCE(v.votes, 0) FROM posts p
             LEFT JOIN post_vote_counts v ON v.post_id = p.id
             WHERE p.id = ?1 AND p.deleted_at IS NULL"
        }
        SubjectKind::Comment => {
            "SELECT vote_count FROM comments WHERE id = ?1 AND deleted_at IS NULL"
        }
    };
    let count = conn
        .query_row(sql, params![subject_id], |r| r.get(0))
        .optional()?;
    Ok(count)
}

/// Which of `subject_ids` the user currently has a vote on, in request
/// order.
pub fn voted_among(
    pool: &DbPool,
    kind: SubjectKind,
    user_id: i64,
    subject_ids: &[i64],
) -> AppResult<Vec<VoteStatus>> {
    if subject_ids.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool.get()?;
    let placeholders = vec!["?"; subject_ids.len()].join(", ");
    let sql = match kind {
        SubjectKind::Post => format!(
            "SELECT post_id FROM post_votes WHERE user_id = ? AND post_id IN ({})",
            placeholders
        ),
        SubjectKind::Comment => format!(
            "SELECT comment_id FROM comment_votes WHERE user_id = ? AND comment_id IN ({})",
            placeholders
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let voted = stmt
        .query_map(
            params_from_iter(std::iter::once(&user_id).chain(subject_ids)),
            |r| r.get::<_, i64>(0),
        )?
        .collect::<rusqlite::Result<HashSet<_>>>()?;

    Ok(subject_ids
        .iter()
        .map(|id| VoteStatus {
            subject_id: *id,
            voted: voted.contains(id),
        })
        .collect())
}

/// Live posts the user has upvoted, most recent vote first.
pub fn voted_posts(pool: &DbPool, user_id: i64, page: i64, page_size: i64) -> AppResult<Vec<i64>> {
    let Some((limit, offset)) = page_bounds(page, page_size) else {
        return Ok(Vec::new());
    };
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT v.post_id FROM post_votes v JOIN posts p ON p.id = v.post_id
         WHERE v.user_id = ?1 AND p.deleted_at IS NULL
         ORDER BY v.created_at DESC, v.post_id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let ids = stmt
        .query_map(params![user_id, limit, offset], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Vote counts for the live posts among `post_ids`, in request order.
/// Unknown or deleted posts are left out.
pub fn post_vote_counts(pool: &DbPool, post_ids: &[i64]) -> AppResult<Vec<VoteCount>> {
    if post_ids.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool.get()?;
    let sql = format!(
        "SELECT p.id, COALESCE(v.votes, 0) FROM posts p
         LEFT JOIN post_vote_counts v ON v.post_id = p.id
         WHERE p.deleted_at IS NULL AND p.id IN ({})",
        vec!["?"; post_ids.len()].join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut counts: HashMap<i64, i64> = stmt
        .query_map(params_from_iter(post_ids), |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    Ok(post_ids
        .iter()
        .filter_map(|id| {
            counts.remove(id).map(|votes| VoteCount {
                subject_id: *id,
                votes,
            })
        })
        .collect())
}

/// Who upvoted a post, oldest vote first.
pub fn post_voters(pool: &DbPool, post_id: i64, page: i64, page_size: i64) -> AppResult<Vec<Voter>> {
    let Some((limit, offset)) = page_bounds(page, page_size) else {
        return Ok(Vec::new());
    };
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, v.created_at FROM post_votes v
         JOIN users u ON u.id = v.user_id
         WHERE v.post_id = ?1
         ORDER BY v.created_at, u.id LIMIT ?2 OFFSET ?3",
    )?;
    let voters = stmt
        .query_map(params![post_id, limit, offset], |r| {
            Ok(Voter {
                user_id: r.get(0)?,
                username: r.get(1)?,
                voted_at: r.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(voters)
}

/// Author of a live post or comment.
pub fn subject_author(pool: &DbPool, kind: SubjectKind, subject_id: i64) -> AppResult<Option<i64>> {
    let conn = pool.get()?;
    let sql = match kind {
        SubjectKind::Post => "SELECT author_id FROM posts WHERE id = ?1 AND deleted_at IS NULL",
        SubjectKind::Comment => {
            "SELECT author_id FROM comments WHERE id = ?1 AND deleted_at IS NULL"
        }
    };
    let author = conn
        .query_row(sql, params![subject_id], |r| r.get(0))
        .optional()?;
    Ok(author)
}
