//! Redis cache backend.
//!
//! Summaries are plain string keys with a TTL, rankings are sorted sets, and
//! a [`Batch`] becomes one `MULTI`/`EXEC` pipeline. The connection manager
//! reconnects on its own, so a restart of Redis surfaces as a failed call
//! rather than a dead handle.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisError};

use super::{Batch, CacheBackend, CacheError, CacheOp, CacheResult};

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        CacheError::Unavailable(e.to_string())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str, connect_timeout: Duration) -> CacheResult<Self> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(connect_timeout);

        let client = Client::open(url)?;
        let connection = client.get_connection_manager_with_config(config).await?;
        tracing::info!(url, "Connected to redis");
        Ok(Self { connection })
    }

    fn pipeline(batch: Batch) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                CacheOp::Set {
                    key,
                    value,
                    ttl: Some(ttl),
                } => {
                    // PX rejects zero, so round sub-millisecond TTLs up.
                    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                    pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(millis).ignore();
                }
                CacheOp::Set {
                    key,
                    value,
                    ttl: None,
                } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                CacheOp::Del { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                CacheOp::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(score).arg(member).ignore();
                }
                CacheOp::ZRem { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member).ignore();
                }
                CacheOp::ZIncrExisting { key, member, delta } => {
                    pipe.cmd("ZADD")
                        .arg(key)
                        .arg("XX")
                        .arg("INCR")
                        .arg(delta)
                        .arg(member)
                        .ignore();
                }
            }
        }
        pipe
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut con = self.connection.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.connection.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut con).await?;
        Ok(values)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut con = self.connection.clone();
        let found: bool = con.exists(key).await?;
        Ok(found)
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> CacheResult<Vec<String>> {
        let (Ok(start), Ok(stop)) = (isize::try_from(start), isize::try_from(stop)) else {
            return Ok(Vec::new());
        };
        let mut con = self.connection.clone();
        let members: Vec<String> = con.zrevrange(key, start, stop).await?;
        Ok(members)
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        let mut con = self.connection.clone();
        let score: Option<f64> = con.zscore(key, member).await?;
        Ok(score)
    }

    async fn exec(&self, batch: Batch) -> CacheResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut con = self.connection.clone();
        let () = Self::pipeline(batch).query_async(&mut con).await?;
        Ok(())
    }
}
