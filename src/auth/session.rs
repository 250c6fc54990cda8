use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::error::AppResult;
use crate::state::DbPool;

/// The user behind a live session token.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub expires_at: DateTime<Utc>,
}

/// Create a new session for a user. Returns the token and its expiry.
pub fn create_session(
    pool: &DbPool,
    user_id: i64,
    hours: u64,
) -> AppResult<(String, DateTime<Utc>)> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now();
    let expires_at = now + Duration::hours(hours as i64);

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, user_id, token, expires_at.timestamp(), now.timestamp()],
    )?;

    Ok((token, expires_at))
}

/// Look up an unexpired session.
pub fn find_session(pool: &DbPool, token: &str) -> AppResult<Option<SessionUser>> {
    let conn = pool.get()?;
    let row: Option<(i64, String, bool, i64)> = conn
        .query_row(
            "SELECT u.id, u.username, u.is_admin, s.expires_at FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1 AND s.expires_at > ?2",
            params![token, Utc::now().timestamp()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    Ok(row.and_then(|(user_id, username, is_admin, expires)| {
        DateTime::<Utc>::from_timestamp(expires, 0).map(|expires_at| SessionUser {
            user_id,
            username,
            is_admin,
            expires_at,
        })
    }))
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory_pool, users};

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_lifecycle() {
        let pool = memory_pool().unwrap();
        let user = users::ensure_user(&pool, "alice").unwrap();
        let (token, expires_at) = create_session(&pool, user.id, 1).unwrap();
        assert!(expires_at > Utc::now());

        let session = find_session(&pool, &token).unwrap().unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.username, "alice");
        assert!(!session.is_admin);

        delete_session(&pool, &token).unwrap();
        assert!(find_session(&pool, &token).unwrap().is_none());
    }

    #[test]
    fn expired_sessions_are_ignored() {
        let pool = memory_pool().unwrap();
        let user = users::ensure_user(&pool, "alice").unwrap();
        let (token, _) = create_session(&pool, user.id, 0).unwrap();
        assert!(find_session(&pool, &token).unwrap().is_none());
    }
}
