use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Batch, CacheBackend, CacheOp, CacheResult};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    zsets: HashMap<String, HashMap<String, f64>>,
}

impl Inner {
    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        if self.strings.get(key).is_some_and(|e| !e.is_live(now)) {
            self.strings.remove(key);
        }
        self.strings.get(key)
    }

    fn apply(&mut self, op: CacheOp, now: Instant) {
        match op {
            CacheOp::Set { key, value, ttl } => {
                let expires_at = ttl.map(|ttl| now + ttl);
                self.strings.insert(key, Entry { value, expires_at });
            }
            CacheOp::Del { key } => {
                self.strings.remove(&key);
                self.zsets.remove(&key);
            }
            CacheOp::ZAdd { key, member, score } => {
                self.zsets.entry(key).or_default().insert(member, score);
            }
            CacheOp::ZRem { key, member } => {
                if let Some(set) = self.zsets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.zsets.remove(&key);
                    }
                }
            }
            CacheOp::ZIncrExisting { key, member, delta } => {
                if let Some(score) = self.zsets.get_mut(&key).and_then(|set| set.get_mut(&member)) {
                    *score += delta;
                }
            }
        }
    }
}

/// In-process cache backend. A single lock guards all keys, so a batch is
/// applied without any reader observing it half-done.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live(key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| inner.live(key, now).map(|e| e.value.clone()))
            .collect())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Ok(inner.live(key, now).is_some() || inner.zsets.contains_key(key))
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: usize) -> CacheResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let Some(set) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        if start > stop || start >= set.len() {
            return Ok(Vec::new());
        }

        let mut members: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));

        Ok(members
            .into_iter()
            .skip(start)
            .take((stop - start).saturating_add(1))
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        let inner = self.inner.lock().await;
        Ok(inner.zsets.get(key).and_then(|set| set.get(member).copied()))
    }

    async fn exec(&self, batch: Batch) -> CacheResult<()> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        for op in batch.into_ops() {
            inner.apply(op, now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_get_and_delete() {
        let cache = MemoryCache::new();
        cache
            .exec(Batch::new().set("k", "v".to_string(), None))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.exec(Batch::new().del("k")).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .exec(Batch::new().set("k", "v".to_string(), Some(Duration::from_millis(30))))
            .await
            .unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.exists("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mget_reports_missing_slots() {
        let cache = MemoryCache::new();
        cache
            .exec(Batch::new().set("a", "1".to_string(), None))
            .await
            .unwrap();
        let values = cache
            .mget(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("1".to_string()), None]);
    }

    #[tokio::test]
    async fn zrevrange_orders_by_descending_score() {
        let cache = MemoryCache::new();
        cache
            .exec(
                Batch::new()
                    .zadd("z", "low", 1.0)
                    .zadd("z", "high", 3.0)
                    .zadd("z", "mid", 2.0),
            )
            .await
            .unwrap();

        assert_eq!(
            cache.zrevrange("z", 0, 10).await.unwrap(),
            vec!["high", "mid", "low"]
        );
        assert_eq!(cache.zrevrange("z", 1, 1).await.unwrap(), vec!["mid"]);
        assert!(cache.zrevrange("z", 3, 5).await.unwrap().is_empty());
        assert!(cache.zrevrange("missing", 0, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conditional_increment_skips_absent_members() {
        let cache = MemoryCache::new();
        cache
            .exec(Batch::new().zincr_existing("z", "m", 1.5))
            .await
            .unwrap();
        assert_eq!(cache.zscore("z", "m").await.unwrap(), None);

        cache
            .exec(
                Batch::new()
                    .zadd("z", "m", 1.0)
                    .zincr_existing("z", "m", 1.5)
                    .zincr_existing("z", "m", 0.5),
            )
            .await
            .unwrap();
        assert_eq!(cache.zscore("z", "m").await.unwrap(), Some(3.0));

        cache.exec(Batch::new().zrem("z", "m")).await.unwrap();
        assert_eq!(cache.zscore("z", "m").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zrevrange_to_the_end_of_usize() {
        let cache = MemoryCache::new();
        cache.exec(Batch::new().zadd("z", "a", 1.0)).await.unwrap();
        assert_eq!(cache.zrevrange("z", 0, usize::MAX).await.unwrap(), vec!["a"]);
    }
}
