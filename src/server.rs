use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::cache::{CacheBackend, RankingCache, TokenBlacklist};
use crate::config::Config;
use crate::hub::ConnectionHub;
use crate::pipeline::{ChannelTransport, DeadLetterQueue, VotePipeline, VoteWorker};
use crate::posts::{CommentService, DelayedInvalidator, PostService};
use crate::routes;
use crate::state::{AppState, DbPool};

/// Wire up every component and start the background tasks: the hub loop,
/// one vote worker per partition and the delayed invalidator. Must run
/// inside a tokio runtime.
pub fn build_state(config: Config, db: DbPool, backend: Arc<dyn CacheBackend>) -> AppState {
    let ranking = RankingCache::new(Arc::clone(&backend), config.cache.summary_ttl());
    let blacklist = TokenBlacklist::new(backend);

    let hub = ConnectionHub::spawn(&config.hub);
    let dead_letters = DeadLetterQueue::new(config.pipeline.dead_letter_capacity);

    let (transport, partitions) =
        ChannelTransport::new(config.pipeline.partitions, config.pipeline.queue_capacity);
    for receiver in partitions {
        let worker = VoteWorker::new(
            db.clone(),
            ranking.clone(),
            hub.clone(),
            dead_letters.clone(),
        );
        tokio::spawn(worker.run(receiver));
    }
    let votes = VotePipeline::new(Arc::new(transport));

    let invalidator = DelayedInvalidator::spawn(
        ranking.clone(),
        config.posts.delayed_delete(),
        config.posts.invalidation_backlog,
    );
    let posts = PostService::new(db.clone(), ranking.clone(), invalidator, config.posts.clone());
    let comments = CommentService::new(db.clone(), hub.clone());

    AppState {
        db,
        config,
        ranking,
        posts,
        comments,
        votes,
        hub,
        blacklist,
        dead_letters,
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .merge(routes::posts::router())
        .merge(routes::votes::router())
        .merge(routes::comments::router())
        .merge(routes::communities::router())
        .merge(routes::auth::router())
        .merge(routes::admin::router())
        .merge(routes::ws::router());

    if std::env::var("AGORA_TEST_SEED").is_ok() {
        app = app.merge(routes::auth::seed_router());
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
