use rusqlite::{params, OptionalExtension, Row};

use super::models::User;
use crate::error::AppResult;
use crate::state::DbPool;

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        is_admin: row.get(2)?,
    })
}

/// Create a user, or return the existing one with that username.
pub fn ensure_user(pool: &DbPool, username: &str) -> AppResult<User> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR IGNORE INTO users (username, created_at) VALUES (?1, ?2)",
        params![username, chrono::Utc::now().timestamp()],
    )?;
    let user = conn.query_row(
        "SELECT id, username, is_admin FROM users WHERE username = ?1",
        params![username],
        user_from_row,
    )?;
    Ok(user)
}

pub fn find_user(pool: &DbPool, user_id: i64) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            "SELECT id, username, is_admin FROM users WHERE id = ?1",
            params![user_id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

/// Grant or revoke operator access. Returns false for an unknown username.
pub fn set_admin(pool: &DbPool, username: &str, is_admin: bool) -> AppResult<bool> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE users SET is_admin = ?2 WHERE username = ?1",
        params![username, is_admin],
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[test]
    fn ensure_user_is_idempotent() {
        let pool = memory_pool().unwrap();
        let first = ensure_user(&pool, "alice").unwrap();
        let second = ensure_user(&pool, "alice").unwrap();
        assert_eq!(first.id, second.id);

        let found = find_user(&pool, first.id).unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert!(find_user(&pool, 999).unwrap().is_none());
    }

    #[test]
    fn users_start_without_admin_rights() {
        let pool = memory_pool().unwrap();
        let alice = ensure_user(&pool, "alice").unwrap();
        assert!(!alice.is_admin);

        assert!(set_admin(&pool, "alice", true).unwrap());
        assert!(find_user(&pool, alice.id).unwrap().unwrap().is_admin);
        assert!(!set_admin(&pool, "nobody", true).unwrap());
    }
}
