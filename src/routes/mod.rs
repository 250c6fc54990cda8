pub mod admin;
pub mod auth;
pub mod comments;
pub mod communities;
pub mod posts;
pub mod votes;
pub mod ws;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// `?page=&size=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// `?ids=1,2,3` on batch lookups.
#[derive(Debug, Default, Deserialize)]
pub struct IdsQuery {
    #[serde(default)]
    pub ids: String,
}

impl IdsQuery {
    pub fn parse(&self) -> AppResult<Vec<i64>> {
        self.ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse()
                    .map_err(|_| AppError::BadRequest(format!("Invalid id '{}'", s)))
            })
            .collect()
    }
}
