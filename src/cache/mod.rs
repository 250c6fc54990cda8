pub mod blacklist;
pub mod keys;
pub mod memory;
pub mod ranking;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use blacklist::TokenBlacklist;
pub use memory::MemoryCache;
pub use ranking::{hotness, hotness_delta, Order, RankingCache};
pub use redis_store::RedisCache;

use crate::config::{CacheBackendKind, CacheConfig};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cached value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// One write applied by [`CacheBackend::exec`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
    /// Add `delta` to a member's score only if the member is present.
    ZIncrExisting {
        key: String,
        member: String,
        delta: f64,
    },
}

/// Writes that must become visible together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<CacheOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: String, ttl: Option<Duration>) -> Self {
        self.ops.push(CacheOp::Set {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(CacheOp::Del { key: key.into() });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(CacheOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(CacheOp::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn zincr_existing(
        mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        delta: f64,
    ) -> Self {
        self.ops.push(CacheOp::ZIncrExisting {
            key: key.into(),
            member: member.into(),
            delta,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<CacheOp> {
        self.ops
    }
}

/// Key-value and sorted-set cache used by the ranking index and the token
/// blacklist. Reads are single round-trips; every write goes through `exec`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Bulk lookup; the result has one slot per requested key.
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Members ordered by descending score, `start..=stop` inclusive.
    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> CacheResult<Vec<String>>;

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>>;

    /// Apply all operations atomically.
    async fn exec(&self, batch: Batch) -> CacheResult<()>;
}

/// Open the backend selected in `[cache]`.
pub async fn connect(config: &CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> {
    match config.backend {
        CacheBackendKind::Redis => {
            let cache = RedisCache::connect(&config.redis_url, config.connect_timeout()).await?;
            Ok(Arc::new(cache))
        }
        CacheBackendKind::Memory => {
            tracing::warn!("Using the in-process cache; rankings are lost on restart");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}
