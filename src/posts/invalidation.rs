use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::cache::RankingCache;

struct Pending {
    post_id: i64,
    due: Instant,
}

/// Second half of the delayed double delete. Scheduled deletions wait in a
/// bounded queue drained by one task; they all share the same delay, so the
/// queue is already in due order.
#[derive(Clone)]
pub struct DelayedInvalidator {
    tx: mpsc::Sender<Pending>,
    ranking: RankingCache,
    delay: Duration,
}

impl DelayedInvalidator {
    pub fn spawn(ranking: RankingCache, delay: Duration, backlog: usize) -> Self {
        let (tx, rx) = mpsc::channel(backlog.max(1));
        tokio::spawn(drain(rx, ranking.clone()));
        Self { tx, ranking, delay }
    }

    /// Delete the post's cached summary once the delay has passed. When the
    /// queue is full the delete happens now instead.
    pub async fn schedule(&self, post_id: i64) {
        let pending = Pending {
            post_id,
            due: Instant::now() + self.delay,
        };
        if let Err(e) = self.tx.try_send(pending) {
            tracing::warn!(post_id, "Delayed invalidation not queued ({}), deleting now", e);
            if let Err(e) = self.ranking.invalidate(post_id).await {
                tracing::error!(post_id, "Cache invalidation failed: {}", e);
            }
        }
    }

    /// Deletions waiting for their delay.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn drain(mut rx: mpsc::Receiver<Pending>, ranking: RankingCache) {
    while let Some(pending) = rx.recv().await {
        sleep_until(pending.due).await;
        if let Err(e) = ranking.invalidate(pending.post_id).await {
            tracing::error!(post_id = pending.post_id, "Delayed invalidation failed: {}", e);
        }
    }
}
