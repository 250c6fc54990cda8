//! Post operations layered over the store and the ranking cache.

pub mod comments;
pub mod invalidation;
pub mod summary;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use comments::CommentService;
pub use invalidation::DelayedInvalidator;

use crate::cache::{Order, RankingCache};
use crate::coalesce::{keys, Coalescer};
use crate::config::PostsConfig;
use crate::db::models::{PostDetail, PostSummary, VoteCount, VoteStatus, Voter};
use crate::db::posts::NewPost;
use crate::db::{communities, posts, votes};
use crate::error::{AppError, AppResult};
use crate::pipeline::SubjectKind;
use crate::state::DbPool;

#[derive(Debug, Clone, Deserialize)]
pub struct PostInput {
    pub title: String,
    pub content: String,
}

#[derive(Clone)]
pub struct PostService {
    pool: DbPool,
    ranking: RankingCache,
    invalidator: DelayedInvalidator,
    config: PostsConfig,
    lists: Coalescer<Vec<PostSummary>, AppError>,
    details: Coalescer<PostDetail, AppError>,
    counts: Coalescer<i64, AppError>,
}

impl PostService {
    pub fn new(
        pool: DbPool,
        ranking: RankingCache,
        invalidator: DelayedInvalidator,
        config: PostsConfig,
    ) -> Self {
        Self {
            pool,
            ranking,
            invalidator,
            config,
            lists: Coalescer::new(),
            details: Coalescer::new(),
            counts: Coalescer::new(),
        }
    }

    pub fn page_params(&self, page: Option<i64>, size: Option<i64>) -> (i64, i64) {
        summary::page_params(
            page,
            size,
            self.config.default_page_size,
            self.config.max_page_size,
        )
    }

    pub async fn create_post(
        &self,
        author_id: i64,
        community_id: i64,
        input: &PostInput,
    ) -> AppResult<PostDetail> {
        validate(input)?;
        let excerpt = summary::excerpt(&input.content, self.config.summary_length);
        let now = Utc::now();
        let post = posts::create_post(
            &self.pool,
            &NewPost {
                title: input.title.trim(),
                content: &input.content,
                summary: &excerpt,
                author_id,
                community_id,
            },
            now.timestamp(),
        )?;

        self.ranking.record_new_post(&post.to_summary(), now).await?;
        tracing::info!(post_id = post.post_id, author_id, "Post created");
        Ok(post)
    }

    /// One page of summaries in ranking order. Summaries missing from the
    /// cache are read from the store and cached again; rankings are left
    /// as they are.
    pub async fn list_posts(
        &self,
        order: Order,
        page: Option<i64>,
        size: Option<i64>,
    ) -> AppResult<Vec<PostSummary>> {
        let (page, size) = self.page_params(page, size);
        let pool = self.pool.clone();
        let ranking = self.ranking.clone();
        self.lists
            .run(keys::post_list(order, page, size), move || async move {
                let ids = ranking.list_ids(order, page, size).await?;
                let (found, missing) = ranking.fetch_summaries(&ids).await?;

                let mut by_id: HashMap<i64, PostSummary> =
                    found.into_iter().map(|s| (s.post_id, s)).collect();
                if !missing.is_empty() {
                    tracing::debug!(missing = missing.len(), "Summary cache miss");
                    for summary in posts::get_summaries(&pool, &missing)? {
                        if let Err(e) = ranking.store_summary(&summary).await {
                            tracing::warn!(post_id = summary.post_id, "Caching summary failed: {}", e);
                        }
                        by_id.insert(summary.post_id, summary);
                    }
                }
                Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
            })
            .await
    }

    pub async fn post_detail(&self, post_id: i64) -> AppResult<PostDetail> {
        let pool = self.pool.clone();
        self.details
            .run(keys::post_detail(post_id), move || async move {
                posts::get_post(&pool, post_id)?.ok_or(AppError::NotFound)
            })
            .await
    }

    /// Edit a post with a delayed double delete of its cached summary:
    /// delete, write, then delete again after the configured delay.
    pub async fn update_post(
        &self,
        post_id: i64,
        user_id: i64,
        input: &PostInput,
    ) -> AppResult<PostDetail> {
        validate(input)?;
        self.ensure_author(post_id, user_id)?;

        self.ranking.invalidate(post_id).await?;
        let excerpt = summary::excerpt(&input.content, self.config.summary_length);
        let updated = posts::update_post(
            &self.pool,
            post_id,
            input.title.trim(),
            &input.content,
            &excerpt,
            Utc::now().timestamp(),
        )?;
        if !updated {
            return Err(AppError::NotFound);
        }
        self.invalidator.schedule(post_id).await;

        tracing::info!(post_id, "Post updated");
        posts::get_post(&self.pool, post_id)?.ok_or(AppError::NotFound)
    }

    /// Soft-delete a post and drop it from the cache and both rankings.
    pub async fn delete_post(&self, post_id: i64, user_id: i64) -> AppResult<()> {
        self.ensure_author(post_id, user_id)?;
        if !posts::delete_post(&self.pool, post_id, Utc::now().timestamp())? {
            return Err(AppError::NotFound);
        }
        self.ranking.remove(post_id).await?;
        tracing::info!(post_id, "Post deleted");
        Ok(())
    }

    pub async fn vote_count(&self, kind: SubjectKind, subject_id: i64) -> AppResult<i64> {
        let pool = self.pool.clone();
        self.counts
            .run(keys::vote_count(kind, subject_id), move || async move {
                votes::vote_count(&pool, kind, subject_id)?.ok_or(AppError::NotFound)
            })
            .await
    }

    /// Persisted counts for the live posts among `post_ids`.
    pub fn vote_counts(&self, post_ids: &[i64]) -> AppResult<Vec<VoteCount>> {
        self.check_batch(post_ids)?;
        votes::post_vote_counts(&self.pool, post_ids)
    }

    pub fn voted_among(
        &self,
        kind: SubjectKind,
        user_id: i64,
        subject_ids: &[i64],
    ) -> AppResult<Vec<VoteStatus>> {
        self.check_batch(subject_ids)?;
        votes::voted_among(&self.pool, kind, user_id, subject_ids)
    }

    pub fn voted_posts(
        &self,
        user_id: i64,
        page: Option<i64>,
        size: Option<i64>,
    ) -> AppResult<Vec<i64>> {
        let (page, size) = self.page_params(page, size);
        votes::voted_posts(&self.pool, user_id, page, size)
    }

    pub fn voters(
        &self,
        post_id: i64,
        page: Option<i64>,
        size: Option<i64>,
    ) -> AppResult<Vec<Voter>> {
        if posts::post_author(&self.pool, post_id)?.is_none() {
            return Err(AppError::NotFound);
        }
        let (page, size) = self.page_params(page, size);
        votes::post_voters(&self.pool, post_id, page, size)
    }

    pub fn community_posts(
        &self,
        community_id: i64,
        page: Option<i64>,
        size: Option<i64>,
    ) -> AppResult<Vec<PostSummary>> {
        if communities::get_community(&self.pool, community_id)?.is_none() {
            return Err(AppError::NotFound);
        }
        let (page, size) = self.page_params(page, size);
        posts::community_posts(&self.pool, community_id, page, size)
    }

    /// Re-rank every live post still inside the summary retention window.
    /// Runs at startup so a flushed or in-process cache is usable at once.
    pub async fn rebuild_rankings(&self, retention: Duration) -> AppResult<usize> {
        let since = Utc::now().timestamp() - retention.as_secs() as i64;
        let ranked = posts::ranked_since(&self.pool, since)?;
        for post in &ranked {
            let Some(created_at) = DateTime::<Utc>::from_timestamp(post.created_at, 0) else {
                tracing::warn!(post_id = post.summary.post_id, "Skipping post with bad timestamp");
                continue;
            };
            self.ranking
                .restore(&post.summary, post.votes, created_at)
                .await?;
        }
        tracing::info!(posts = ranked.len(), "Rankings rebuilt");
        Ok(ranked.len())
    }

    pub fn pending_invalidations(&self) -> usize {
        self.invalidator.backlog()
    }

    fn check_batch(&self, ids: &[i64]) -> AppResult<()> {
        if ids.len() as i64 > self.config.max_page_size {
            return Err(AppError::BadRequest(format!(
                "At most {} ids per request",
                self.config.max_page_size
            )));
        }
        Ok(())
    }

    fn ensure_author(&self, post_id: i64, user_id: i64) -> AppResult<()> {
        match posts::post_author(&self.pool, post_id)? {
            None => Err(AppError::NotFound),
            Some(author) if author != user_id => Err(AppError::Forbidden),
            Some(_) => Ok(()),
        }
    }
}

fn validate(input: &PostInput) -> AppResult<()> {
    if input.title.trim().is_empty() {
        return Err(AppError::BadRequest("Title is required".into()));
    }
    if input.content.trim().is_empty() {
        return Err(AppError::BadRequest("Content is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cache::MemoryCache;
    use crate::db::{memory_pool, users};

    struct Fixture {
        service: PostService,
        ranking: RankingCache,
        pool: DbPool,
        author: i64,
        community: i64,
    }

    fn fixture(delay: Duration) -> Fixture {
        let pool = memory_pool().unwrap();
        let ranking = RankingCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600));
        let invalidator = DelayedInvalidator::spawn(ranking.clone(), delay, 16);
        let config = PostsConfig {
            summary_length: 5,
            ..PostsConfig::default()
        };
        let service = PostService::new(pool.clone(), ranking.clone(), invalidator, config);
        let author = users::ensure_user(&pool, "alice").unwrap().id;
        let community = communities::create_community(&pool, "general", "")
            .unwrap()
            .community_id;
        Fixture {
            service,
            ranking,
            pool,
            author,
            community,
        }
    }

    fn input(title: &str, content: &str) -> PostInput {
        PostInput {
            title: title.into(),
            content: content.into(),
        }
    }

    async fn is_cached(ranking: &RankingCache, post_id: i64) -> bool {
        ranking.fetch_summaries(&[post_id]).await.unwrap().1.is_empty()
    }

    #[tokio::test]
    async fn created_posts_are_listed_newest_first() {
        let f = fixture(Duration::from_millis(10));
        let first = f
            .service
            .create_post(f.author, f.community, &input("one", "first post body"))
            .await
            .unwrap();
        assert_eq!(first.summary, "first...");
        let second = f
            .service
            .create_post(f.author, f.community, &input("two", "second"))
            .await
            .unwrap();

        let listed = f.service.list_posts(Order::Time, None, None).await.unwrap();
        let ids: Vec<i64> = listed.iter().map(|p| p.post_id).collect();
        assert_eq!(ids, vec![second.post_id, first.post_id]);

        let past_end = f.service.list_posts(Order::Time, Some(2), None).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn list_falls_back_to_store_on_cache_miss() {
        let f = fixture(Duration::from_millis(10));
        let post = f
            .service
            .create_post(f.author, f.community, &input("t", "body"))
            .await
            .unwrap();
        f.ranking.invalidate(post.post_id).await.unwrap();
        assert!(!is_cached(&f.ranking, post.post_id).await);

        let listed = f.service.list_posts(Order::Hot, None, None).await.unwrap();
        assert_eq!(listed, vec![post.to_summary()]);
        assert!(is_cached(&f.ranking, post.post_id).await);
    }

    #[tokio::test]
    async fn update_deletes_summary_twice() {
        let f = fixture(Duration::from_millis(200));
        let post = f
            .service
            .create_post(f.author, f.community, &input("t", "old"))
            .await
            .unwrap();

        let updated = f
            .service
            .update_post(post.post_id, f.author, &input("t2", "new"))
            .await
            .unwrap();
        assert_eq!(updated.title, "t2");
        assert!(!is_cached(&f.ranking, post.post_id).await);

        // A reader repopulates from a stale read before the delayed delete.
        f.ranking.store_summary(&post.to_summary()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!is_cached(&f.ranking, post.post_id).await);

        let listed = f.service.list_posts(Order::Time, None, None).await.unwrap();
        assert_eq!(listed[0].title, "t2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reads_during_an_update_miss_and_stale_refills_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::create_pool(&dir.path().join("posts.db")).unwrap();
        crate::db::run_migrations(&pool).unwrap();
        let ranking = RankingCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600));
        let invalidator = DelayedInvalidator::spawn(ranking.clone(), Duration::from_millis(300), 16);
        let service =
            PostService::new(pool.clone(), ranking.clone(), invalidator, PostsConfig::default());
        let author = users::ensure_user(&pool, "alice").unwrap().id;
        let community = communities::create_community(&pool, "general", "")
            .unwrap()
            .community_id;
        let post = service
            .create_post(author, community, &input("old", "old body"))
            .await
            .unwrap();
        assert!(is_cached(&ranking, post.post_id).await);

        // Holding the write lock stalls the update between its first delete
        // and its store write.
        let holder = pool.get().unwrap();
        holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
        let updater = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .update_post(post.post_id, author, &input("new", "new body"))
                    .await
            })
        };

        let mut missed = false;
        for _ in 0..200 {
            if !is_cached(&ranking, post.post_id).await {
                missed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(missed, "summary was never deleted ahead of the write");
        assert!(!updater.is_finished());

        // A reader inside the window refills the cache with the old row.
        let listed = service.list_posts(Order::Time, None, None).await.unwrap();
        assert_eq!(listed[0].title, "old");
        assert!(is_cached(&ranking, post.post_id).await);

        holder.execute_batch("COMMIT;").unwrap();
        drop(holder);
        let updated = updater.await.unwrap().unwrap();
        assert_eq!(updated.title, "new");

        tokio::time::sleep(Duration::from_millis(600)).await;
        let listed = service.list_posts(Order::Time, None, None).await.unwrap();
        assert_eq!(listed[0].title, "new");
    }

    #[tokio::test]
    async fn only_the_author_may_edit_or_delete() {
        let f = fixture(Duration::from_millis(10));
        let bob = users::ensure_user(&f.pool, "bob").unwrap().id;
        let post = f
            .service
            .create_post(f.author, f.community, &input("t", "c"))
            .await
            .unwrap();

        let err = f
            .service
            .update_post(post.post_id, bob, &input("x", "y"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        let err = f.service.delete_post(post.post_id, bob).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn delete_removes_post_from_rankings() {
        let f = fixture(Duration::from_millis(10));
        let post = f
            .service
            .create_post(f.author, f.community, &input("t", "c"))
            .await
            .unwrap();
        f.service.delete_post(post.post_id, f.author).await.unwrap();

        assert!(f.ranking.score(post.post_id).await.unwrap().is_none());
        assert!(f.service.list_posts(Order::Hot, None, None).await.unwrap().is_empty());
        let err = f.service.post_detail(post.post_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn rebuild_restores_rankings_with_votes() {
        let f = fixture(Duration::from_millis(10));
        let post = f
            .service
            .create_post(f.author, f.community, &input("t", "c"))
            .await
            .unwrap();
        votes::apply_vote(&f.pool, SubjectKind::Post, post.post_id, f.author, true, 0).unwrap();
        f.ranking.remove(post.post_id).await.unwrap();

        let rebuilt = f
            .service
            .rebuild_rankings(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(rebuilt, 1);
        assert!(is_cached(&f.ranking, post.post_id).await);
        assert_eq!(
            f.service
                .vote_count(SubjectKind::Post, post.post_id)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn vote_lookups_respect_batch_limits() {
        let f = fixture(Duration::from_millis(10));
        let post = f
            .service
            .create_post(f.author, f.community, &input("t", "c"))
            .await
            .unwrap();
        votes::apply_vote(&f.pool, SubjectKind::Post, post.post_id, f.author, true, 0).unwrap();

        let counts = f.service.vote_counts(&[post.post_id]).unwrap();
        assert_eq!(counts[0].votes, 1);
        assert_eq!(f.service.voted_posts(f.author, None, None).unwrap(), vec![post.post_id]);
        assert_eq!(f.service.voters(post.post_id, None, None).unwrap().len(), 1);
        assert!(matches!(
            f.service.voters(999, None, None).unwrap_err(),
            AppError::NotFound
        ));

        let too_many: Vec<i64> = (0..=PostsConfig::default().max_page_size).collect();
        assert!(matches!(
            f.service.vote_counts(&too_many).unwrap_err(),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            f.service
                .voted_among(SubjectKind::Post, f.author, &too_many)
                .unwrap_err(),
            AppError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let f = fixture(Duration::from_millis(10));
        let err = f
            .service
            .create_post(f.author, f.community, &input("  ", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = f.service.community_posts(999, None, None).unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}
