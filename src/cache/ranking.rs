//! Ranked index of posts held in the cache backend.
//!
//! Two sorted sets are maintained: one scored by creation time and one by
//! hotness. Summaries live under their own keys with a TTL, so a summary can
//! be missing while the post is still ranked; callers fall back to the
//! database for those IDs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys;
use super::{Batch, CacheBackend, CacheResult};
use crate::db::models::PostSummary;

/// Zero point of the hotness clock (unix seconds).
pub const HOT_EPOCH_SECS: i64 = 1_577_808_000;

/// Seconds of age that weigh as much as a tenfold vote increase.
const HOT_DECAY_SECS: f64 = 45_000.0;

/// Hotness of a post with `net_votes` created at `created_at`.
pub fn hotness(net_votes: i64, created_at: DateTime<Utc>) -> f64 {
    let order = (net_votes.unsigned_abs() as f64).max(1.0).log10();
    let sign = match net_votes {
        n if n > 0 => 1.0,
        n if n < 0 => -1.0,
        _ => 0.0,
    };
    let seconds = (created_at.timestamp() - HOT_EPOCH_SECS) as f64;
    sign * order + seconds / HOT_DECAY_SECS
}

/// Score change when upvotes move from `old_up` to `new_up`. Exact while
/// downvotes are not counted.
pub fn hotness_delta(old_up: i64, new_up: i64) -> f64 {
    (new_up.max(1) as f64).log10() - (old_up.max(1) as f64).log10()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Hot,
    Time,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Hot => "hot",
            Order::Time => "time",
        }
    }

    fn ranking_key(&self) -> &'static str {
        match self {
            Order::Hot => keys::POST_HOT_RANKING,
            Order::Time => keys::POST_TIME_RANKING,
        }
    }
}

#[derive(Clone)]
pub struct RankingCache {
    backend: Arc<dyn CacheBackend>,
    summary_ttl: Duration,
}

impl RankingCache {
    pub fn new(backend: Arc<dyn CacheBackend>, summary_ttl: Duration) -> Self {
        Self {
            backend,
            summary_ttl,
        }
    }

    /// Store a fresh post and rank it at zero votes.
    pub async fn record_new_post(
        &self,
        summary: &PostSummary,
        created_at: DateTime<Utc>,
    ) -> CacheResult<()> {
        self.restore(summary, 0, created_at).await
    }

    /// Store a summary and (re)rank it with a known vote count.
    pub async fn restore(
        &self,
        summary: &PostSummary,
        net_votes: i64,
        created_at: DateTime<Utc>,
    ) -> CacheResult<()> {
        let member = summary.post_id.to_string();
        let batch = Batch::new()
            .set(
                keys::post_summary(summary.post_id),
                serde_json::to_string(summary)?,
                Some(self.summary_ttl),
            )
            .zadd(
                keys::POST_TIME_RANKING,
                member.clone(),
                created_at.timestamp() as f64,
            )
            .zadd(keys::POST_HOT_RANKING, member, hotness(net_votes, created_at));
        self.backend.exec(batch).await
    }

    /// Post IDs on a 1-based page, highest score first. Past the end this is
    /// an empty list.
    pub async fn list_ids(&self, order: Order, page: i64, page_size: i64) -> CacheResult<Vec<i64>> {
        if page < 1 || page_size < 1 {
            return Ok(Vec::new());
        }
        let bounds = (page - 1)
            .checked_mul(page_size)
            .and_then(|start| Some((start, start.checked_add(page_size - 1)?)))
            .and_then(|(start, stop)| {
                Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
            });
        let Some((start, stop)) = bounds else {
            return Ok(Vec::new());
        };

        let members = self
            .backend
            .zrevrange(order.ranking_key(), start, stop)
            .await?;
        Ok(members
            .iter()
            .filter_map(|m| match m.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(member = %m, "Ignoring non-numeric ranking member");
                    None
                }
            })
            .collect())
    }

    /// Bulk summary lookup. IDs without a usable cached summary come back in
    /// the second list, in request order.
    pub async fn fetch_summaries(
        &self,
        post_ids: &[i64],
    ) -> CacheResult<(Vec<PostSummary>, Vec<i64>)> {
        if post_ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let keys: Vec<String> = post_ids.iter().map(|id| keys::post_summary(*id)).collect();
        let values = self.backend.mget(&keys).await?;

        let mut found = Vec::with_capacity(post_ids.len());
        let mut missing = Vec::new();
        for (post_id, value) in post_ids.iter().zip(values) {
            match value.map(|raw| serde_json::from_str::<PostSummary>(&raw)) {
                Some(Ok(summary)) => found.push(summary),
                Some(Err(e)) => {
                    tracing::warn!(post_id, "Undecodable cached summary: {}", e);
                    missing.push(*post_id);
                }
                None => missing.push(*post_id),
            }
        }
        Ok((found, missing))
    }

    /// Cache a summary read from the database without touching rankings.
    pub async fn store_summary(&self, summary: &PostSummary) -> CacheResult<()> {
        let batch = Batch::new().set(
            keys::post_summary(summary.post_id),
            serde_json::to_string(summary)?,
            Some(self.summary_ttl),
        );
        self.backend.exec(batch).await
    }

    /// Drop the cached summary only; rankings are kept.
    pub async fn invalidate(&self, post_id: i64) -> CacheResult<()> {
        self.backend
            .exec(Batch::new().del(keys::post_summary(post_id)))
            .await
    }

    /// Drop the summary and the post's membership in both rankings.
    pub async fn remove(&self, post_id: i64) -> CacheResult<()> {
        let member = post_id.to_string();
        let batch = Batch::new()
            .del(keys::post_summary(post_id))
            .zrem(keys::POST_TIME_RANKING, member.clone())
            .zrem(keys::POST_HOT_RANKING, member);
        self.backend.exec(batch).await
    }

    /// Apply the incremental hotness change for an upvote count transition.
    /// A post that is no longer ranked stays unranked.
    pub async fn update_score(&self, post_id: i64, old_up: i64, new_up: i64) -> CacheResult<()> {
        let batch = Batch::new().zincr_existing(
            keys::POST_HOT_RANKING,
            post_id.to_string(),
            hotness_delta(old_up, new_up),
        );
        self.backend.exec(batch).await
    }

    /// Overwrite the hotness score from first principles.
    pub async fn set_score(
        &self,
        post_id: i64,
        net_votes: i64,
        created_at: DateTime<Utc>,
    ) -> CacheResult<()> {
        let batch = Batch::new().zadd(
            keys::POST_HOT_RANKING,
            post_id.to_string(),
            hotness(net_votes, created_at),
        );
        self.backend.exec(batch).await
    }

    pub async fn score(&self, post_id: i64) -> CacheResult<Option<f64>> {
        self.backend
            .zscore(keys::POST_HOT_RANKING, &post_id.to_string())
            .await
    }
}
