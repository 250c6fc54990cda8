use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::cache::{RankingCache, TokenBlacklist};
use crate::config::Config;
use crate::hub::ConnectionHub;
use crate::pipeline::{DeadLetterQueue, VotePipeline};
use crate::posts::{CommentService, PostService};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub ranking: RankingCache,
    pub posts: PostService,
    pub comments: CommentService,
    pub votes: VotePipeline,
    pub hub: ConnectionHub,
    pub blacklist: TokenBlacklist,
    pub dead_letters: DeadLetterQueue,
}
