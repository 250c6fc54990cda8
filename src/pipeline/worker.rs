use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;

use super::{DeadLetter, DeadLetterQueue, PartitionReceiver, SubjectKind, VoteIntent};
use crate::cache::RankingCache;
use crate::db::{posts, votes};
use crate::db::votes::VoteEffect;
use crate::error::{AppError, AppResult};
use crate::hub::{ConnectionHub, MessageKind, NotificationMessage};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Persisting,
    ScoreUpdating,
    Notifying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The vote changed the store; `votes` is the persisted count afterwards.
    Applied { votes: i64 },
    /// Redelivered or repeated intent. Nothing changed.
    Duplicate,
    /// The post or comment no longer exists.
    SubjectGone,
}

/// Consumes one transport partition.
#[derive(Clone)]
pub struct VoteWorker {
    pool: DbPool,
    ranking: RankingCache,
    hub: ConnectionHub,
    dead_letters: DeadLetterQueue,
}

impl VoteWorker {
    pub fn new(
        pool: DbPool,
        ranking: RankingCache,
        hub: ConnectionHub,
        dead_letters: DeadLetterQueue,
    ) -> Self {
        Self {
            pool,
            ranking,
            hub,
            dead_letters,
        }
    }

    pub async fn run(self, mut receiver: PartitionReceiver) {
        let partition = receiver.partition;
        tracing::info!(partition, "Vote worker started");
        while let Some(delivery) = receiver.next().await {
            match delivery {
                Ok(intent) => {
                    self.handle(intent).await;
                }
                Err(e) => tracing::warn!(partition, "Dropping undecodable intent: {}", e),
            }
        }
        tracing::info!(partition, "Vote worker stopped");
    }

    /// Apply a single intent. Failures and panics are logged and recorded as
    /// dead letters; they never escape to the consumer loop.
    pub async fn handle(&self, intent: VoteIntent) -> Option<Outcome> {
        let mut stage = Stage::Persisting;
        let result = AssertUnwindSafe(self.process(intent, &mut stage))
            .catch_unwind()
            .await;

        let error = match result {
            Ok(Ok(outcome)) => {
                tracing::debug!(
                    subject_id = intent.subject_id,
                    user_id = intent.user_id,
                    ?outcome,
                    "Vote processed"
                );
                return Some(outcome);
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string()),
        };

        tracing::error!(
            subject_id = intent.subject_id,
            user_id = intent.user_id,
            ?stage,
            "Vote intent failed: {}",
            error
        );
        self.dead_letters
            .push(DeadLetter {
                intent,
                stage,
                error,
                failed_at: Utc::now(),
            })
            .await;
        None
    }

    async fn process(&self, intent: VoteIntent, stage: &mut Stage) -> AppResult<Outcome> {
        *stage = Stage::Persisting;
        let effect = votes::apply_vote(
            &self.pool,
            intent.subject_kind,
            intent.subject_id,
            intent.user_id,
            intent.vote.is_upvote(),
            Utc::now().timestamp(),
        )?;
        let (delta, count) = match effect {
            VoteEffect::Changed { delta, count } => (delta, count),
            VoteEffect::Unchanged { .. } => return Ok(Outcome::Duplicate),
            VoteEffect::SubjectMissing => return Ok(Outcome::SubjectGone),
        };

        *stage = Stage::ScoreUpdating;
        if intent.subject_kind == SubjectKind::Post {
            self.update_post_score(intent.subject_id, count - delta, count)
                .await?;
        }

        *stage = Stage::Notifying;
        if intent.vote.is_upvote() {
            self.notify_author(&intent, count).await;
        }
        Ok(Outcome::Applied { votes: count })
    }

    async fn update_post_score(&self, post_id: i64, old_up: i64, new_up: i64) -> AppResult<()> {
        if self.ranking.score(post_id).await?.is_some() {
            self.ranking.update_score(post_id, old_up, new_up).await?;
            return Ok(());
        }

        // Not ranked yet, e.g. after a cache flush: score from first principles.
        let Some(created_at) = posts::post_created_at(&self.pool, post_id)? else {
            return Ok(());
        };
        let created_at =
            DateTime::<Utc>::from_timestamp(created_at, 0).ok_or(AppError::NotFound)?;
        self.ranking.set_score(post_id, new_up, created_at).await?;

        // A delete that landed after the lookup above has already unranked
        // the post, so take the fresh score back out.
        if posts::post_created_at(&self.pool, post_id)?.is_none() {
            self.ranking.remove(post_id).await?;
        }
        Ok(())
    }

    async fn notify_author(&self, intent: &VoteIntent, votes: i64) {
        let author =
            match votes::subject_author(&self.pool, intent.subject_kind, intent.subject_id) {
                Ok(Some(author)) => author,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(subject_id = intent.subject_id, "Author lookup failed: {}", e);
                    return;
                }
            };
        if author == intent.user_id {
            return;
        }

        let message = NotificationMessage::new(
            MessageKind::Vote,
            intent.user_id,
            author,
            serde_json::json!({
                "subject_kind": intent.subject_kind,
                "subject_id": intent.subject_id,
                "votes": votes,
            }),
        );
        if !self.hub.send_to_user(message).await {
            tracing::debug!(user_id = author, "Author offline, vote notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::{hotness, MemoryCache, Order};
    use crate::config::HubConfig;
    use crate::db::models::PostDetail;
    use crate::db::posts::tests::seed_post;
    use crate::db::{self, memory_pool, users};
    use crate::pipeline::VoteValue;

    struct Fixture {
        worker: VoteWorker,
        pool: DbPool,
        ranking: RankingCache,
        hub: ConnectionHub,
        dead_letters: DeadLetterQueue,
        post: PostDetail,
    }

    async fn fixture(ranked: bool) -> Fixture {
        let pool = memory_pool().unwrap();
        let ranking = RankingCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        let hub = ConnectionHub::spawn(&HubConfig::default());
        let dead_letters = DeadLetterQueue::new(8);
        let post = seed_post(&pool, "alice", "p", 1_700_000_000);
        if ranked {
            let created = DateTime::<Utc>::from_timestamp(post.created_at, 0).unwrap();
            ranking.record_new_post(&post.to_summary(), created).await.unwrap();
        }
        let worker = VoteWorker::new(
            pool.clone(),
            ranking.clone(),
            hub.clone(),
            dead_letters.clone(),
        );
        Fixture {
            worker,
            pool,
            ranking,
            hub,
            dead_letters,
            post,
        }
    }

    fn post_vote(post_id: i64, user_id: i64, vote: VoteValue) -> VoteIntent {
        VoteIntent {
            subject_id: post_id,
            subject_kind: SubjectKind::Post,
            user_id,
            vote,
        }
    }

    #[tokio::test]
    async fn score_moves_by_the_log_delta() {
        let f = fixture(true).await;
        let bob = users::ensure_user(&f.pool, "bob").unwrap();
        let carol = users::ensure_user(&f.pool, "carol").unwrap();

        let before = f.ranking.score(f.post.post_id).await.unwrap().unwrap();
        let first = f.worker.handle(post_vote(f.post.post_id, bob.id, VoteValue::Up)).await;
        assert_eq!(first, Some(Outcome::Applied { votes: 1 }));
        let after_one = f.ranking.score(f.post.post_id).await.unwrap().unwrap();
        assert!((after_one - before).abs() < 1e-9);

        f.worker
            .handle(post_vote(f.post.post_id, carol.id, VoteValue::Up))
            .await;
        let after_two = f.ranking.score(f.post.post_id).await.unwrap().unwrap();
        assert!((after_two - after_one - 2f64.log10()).abs() < 1e-9);

        let undo = f
            .worker
            .handle(post_vote(f.post.post_id, carol.id, VoteValue::Neutral))
            .await;
        assert_eq!(undo, Some(Outcome::Applied { votes: 1 }));
        let after_undo = f.ranking.score(f.post.post_id).await.unwrap().unwrap();
        assert!((after_undo - after_one).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_intent_is_a_duplicate() {
        let f = fixture(true).await;
        let bob = users::ensure_user(&f.pool, "bob").unwrap();
        let intent = post_vote(f.post.post_id, bob.id, VoteValue::Up);

        f.worker.handle(intent).await;
        let score = f.ranking.score(f.post.post_id).await.unwrap();
        assert_eq!(f.worker.handle(intent).await, Some(Outcome::Duplicate));
        assert_eq!(f.ranking.score(f.post.post_id).await.unwrap(), score);
        assert_eq!(f.dead_letters.len().await, 0);
    }

    #[tokio::test]
    async fn unranked_post_is_scored_from_scratch() {
        let f = fixture(false).await;
        let bob = users::ensure_user(&f.pool, "bob").unwrap();
        f.worker
            .handle(post_vote(f.post.post_id, bob.id, VoteValue::Up))
            .await;

        let created = DateTime::<Utc>::from_timestamp(f.post.created_at, 0).unwrap();
        let score = f.ranking.score(f.post.post_id).await.unwrap().unwrap();
        assert!((score - hotness(1, created)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn author_is_notified_of_upvotes_from_others() {
        let f = fixture(true).await;
        let bob = users::ensure_user(&f.pool, "bob").unwrap();
        let mut alice = f.hub.connect(f.post.author_id).await.unwrap();

        f.worker
            .handle(post_vote(f.post.post_id, f.post.author_id, VoteValue::Up))
            .await;
        f.worker
            .handle(post_vote(f.post.post_id, bob.id, VoteValue::Up))
            .await;

        let msg = alice.receiver.recv().await.unwrap();
        assert_eq!(msg.kind, MessageKind::Vote);
        assert_eq!(msg.from, bob.id);
        assert_eq!(msg.payload["votes"], 2);
        assert!(alice.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn deleted_subject_is_skipped() {
        let f = fixture(true).await;
        posts::delete_post(&f.pool, f.post.post_id, 2).unwrap();
        let outcome = f
            .worker
            .handle(post_vote(f.post.post_id, f.post.author_id, VoteValue::Up))
            .await;
        assert_eq!(outcome, Some(Outcome::SubjectGone));
        assert_eq!(f.dead_letters.len().await, 0);
    }

    #[tokio::test]
    async fn votes_do_not_re_rank_a_removed_post() {
        let f = fixture(true).await;
        let bob = users::ensure_user(&f.pool, "bob").unwrap();
        f.worker
            .handle(post_vote(f.post.post_id, bob.id, VoteValue::Up))
            .await;

        // The vote is persisted, then the post is deleted before scoring.
        posts::delete_post(&f.pool, f.post.post_id, 2).unwrap();
        f.ranking.remove(f.post.post_id).await.unwrap();
        f.worker.update_post_score(f.post.post_id, 1, 2).await.unwrap();

        assert_eq!(f.ranking.score(f.post.post_id).await.unwrap(), None);
        assert!(f
            .ranking
            .list_ids(Order::Hot, 1, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(f.dead_letters.len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_do_not_lose_votes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&dir.path().join("votes.db")).unwrap();
        db::run_migrations(&pool).unwrap();

        let ranking = RankingCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        let hub = ConnectionHub::spawn(&HubConfig::default());
        let dead_letters = DeadLetterQueue::new(1024);
        let voters: Vec<i64> = (0..50)
            .map(|n| users::ensure_user(&pool, &format!("voter{}", n)).unwrap().id)
            .collect();
        let posts: Vec<i64> = (0..4)
            .map(|n| seed_post(&pool, "alice", &format!("p{}", n), 1_700_000_000 + n).post_id)
            .collect();

        let mut tasks = Vec::new();
        for post_id in posts.clone() {
            let worker = VoteWorker::new(
                pool.clone(),
                ranking.clone(),
                hub.clone(),
                dead_letters.clone(),
            );
            let voters = voters.clone();
            tasks.push(tokio::spawn(async move {
                for user_id in voters {
                    worker
                        .handle(post_vote(post_id, user_id, VoteValue::Up))
                        .await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(dead_letters.len().await, 0, "{:?}", dead_letters.snapshot().await);
        for post_id in posts {
            assert_eq!(
                votes::vote_count(&pool, SubjectKind::Post, post_id).unwrap(),
                Some(50)
            );
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_dead_lettered() {
        let f = fixture(true).await;
        f.pool
            .get()
            .unwrap()
            .execute_batch("DROP TABLE post_votes;")
            .unwrap();

        let outcome = f
            .worker
            .handle(post_vote(f.post.post_id, f.post.author_id, VoteValue::Up))
            .await;
        assert_eq!(outcome, None);

        let letters = f.dead_letters.snapshot().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].stage, Stage::Persisting);
        assert_eq!(letters[0].intent.subject_id, f.post.post_id);
    }
}
