use rusqlite::{params, OptionalExtension, Row};

use super::models::Community;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

fn community_from_row(row: &Row<'_>) -> rusqlite::Result<Community> {
    Ok(Community {
        community_id: row.get(0)?,
        name: row.get(1)?,
        introduction: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn create_community(pool: &DbPool, name: &str, introduction: &str) -> AppResult<Community> {
    let conn = pool.get()?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO communities (name, introduction, created_at) VALUES (?1, ?2, ?3)",
        params![name, introduction, chrono::Utc::now().timestamp()],
    )?;
    if inserted == 0 {
        return Err(AppError::BadRequest(format!(
            "Community '{}' already exists",
            name
        )));
    }
    let community = conn.query_row(
        "SELECT id, name, introduction, created_at FROM communities WHERE id = ?1",
        params![conn.last_insert_rowid()],
        community_from_row,
    )?;
    Ok(community)
}

pub fn get_community(pool: &DbPool, community_id: i64) -> AppResult<Option<Community>> {
    let conn = pool.get()?;
    let community = conn
        .query_row(
            "SELECT id, name, introduction, created_at FROM communities WHERE id = ?1",
            params![community_id],
            community_from_row,
        )
        .optional()?;
    Ok(community)
}

pub fn list_communities(pool: &DbPool) -> AppResult<Vec<Community>> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT id, name, introduction, created_at FROM communities ORDER BY name")?;
    let communities = stmt
        .query_map([], community_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(communities)
}
