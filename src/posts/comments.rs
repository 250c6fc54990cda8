use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::comments::{self, NewComment};
use crate::db::models::Comment;
use crate::db::posts;
use crate::error::{AppError, AppResult};
use crate::hub::{ConnectionHub, MessageKind, NotificationMessage};
use crate::state::DbPool;

#[derive(Debug, Clone, Deserialize)]
pub struct CommentInput {
    pub content: String,
    #[serde(default)]
    pub reply_id: Option<i64>,
}

#[derive(Clone)]
pub struct CommentService {
    pool: DbPool,
    hub: ConnectionHub,
}

impl CommentService {
    pub fn new(pool: DbPool, hub: ConnectionHub) -> Self {
        Self { pool, hub }
    }

    /// Store a comment and tell whoever it answers, if they are online.
    pub async fn create(
        &self,
        post_id: i64,
        author_id: i64,
        input: &CommentInput,
    ) -> AppResult<Comment> {
        validate(&input.content)?;
        let comment = comments::create_comment(
            &self.pool,
            &NewComment {
                post_id,
                author_id,
                content: &input.content,
                reply_id: input.reply_id,
            },
            Utc::now().timestamp(),
        )?;

        let recipient = match comment.reply_id {
            Some(reply_id) => comments::get_comment(&self.pool, reply_id)?.map(|c| c.author_id),
            None => posts::post_author(&self.pool, post_id)?,
        };
        if let Some(recipient) = recipient.filter(|r| *r != author_id) {
            let message = NotificationMessage::new(
                MessageKind::Comment,
                author_id,
                recipient,
                serde_json::json!({
                    "post_id": post_id,
                    "comment_id": comment.comment_id,
                }),
            );
            if !self.hub.send_to_user(message).await {
                tracing::debug!(user_id = recipient, "Recipient offline, comment notification dropped");
            }
        }
        Ok(comment)
    }

    pub fn top_level(&self, post_id: i64, page: i64, size: i64) -> AppResult<Vec<Comment>> {
        if posts::post_author(&self.pool, post_id)?.is_none() {
            return Err(AppError::NotFound);
        }
        comments::top_comments(&self.pool, post_id, page, size)
    }

    /// Replies in the thread that `comment_id` belongs to.
    pub fn replies(&self, comment_id: i64, page: i64, size: i64) -> AppResult<Vec<Comment>> {
        let root = self.thread_root(comment_id)?;
        comments::replies(&self.pool, root, page, size)
    }

    pub fn get(&self, comment_id: i64) -> AppResult<Comment> {
        comments::get_comment(&self.pool, comment_id)?.ok_or(AppError::NotFound)
    }

    pub fn update(&self, comment_id: i64, user_id: i64, content: &str) -> AppResult<Comment> {
        validate(content)?;
        self.ensure_author(comment_id, user_id)?;
        if !comments::update_comment(&self.pool, comment_id, content, Utc::now().timestamp())? {
            return Err(AppError::NotFound);
        }
        tracing::info!(comment_id, "Comment updated");
        self.get(comment_id)
    }

    /// Delete a comment and whatever hangs off it. Returns how many
    /// comments were hidden.
    pub fn delete(&self, comment_id: i64, user_id: i64) -> AppResult<usize> {
        self.ensure_author(comment_id, user_id)?;
        let hidden = comments::delete_comment(&self.pool, comment_id, Utc::now().timestamp())?;
        if hidden == 0 {
            return Err(AppError::NotFound);
        }
        tracing::info!(comment_id, hidden, "Comment deleted");
        Ok(hidden)
    }

    pub fn post_counts(&self, post_id: i64) -> AppResult<CommentCounts> {
        if posts::post_author(&self.pool, post_id)?.is_none() {
            return Err(AppError::NotFound);
        }
        let (total, top_level) = comments::post_comment_counts(&self.pool, post_id)?;
        Ok(CommentCounts { total, top_level })
    }

    /// Replies in the thread that `comment_id` belongs to.
    pub fn reply_count(&self, comment_id: i64) -> AppResult<i64> {
        let root = self.thread_root(comment_id)?;
        comments::reply_count(&self.pool, root)
    }

    pub fn user_count(&self, user_id: i64) -> AppResult<i64> {
        comments::user_comment_count(&self.pool, user_id)
    }

    fn thread_root(&self, comment_id: i64) -> AppResult<i64> {
        let comment = self.get(comment_id)?;
        Ok(comment.parent_id.unwrap_or(comment.comment_id))
    }

    fn ensure_author(&self, comment_id: i64, user_id: i64) -> AppResult<()> {
        match comments::comment_author(&self.pool, comment_id)? {
            None => Err(AppError::NotFound),
            Some(author) if author != user_id => Err(AppError::Forbidden),
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommentCounts {
    pub total: i64,
    pub top_level: i64,
}

fn validate(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("Content is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::db::posts::tests::seed_post;
    use crate::db::{memory_pool, users};

    fn input(content: &str, reply_id: Option<i64>) -> CommentInput {
        CommentInput {
            content: content.into(),
            reply_id,
        }
    }

    #[tokio::test]
    async fn replies_notify_the_replied_to_author() {
        let pool = memory_pool().unwrap();
        let hub = ConnectionHub::spawn(&HubConfig::default());
        let service = CommentService::new(pool.clone(), hub.clone());
        let post = seed_post(&pool, "alice", "p", 1);
        let bob = users::ensure_user(&pool, "bob").unwrap();

        let mut alice = hub.connect(post.author_id).await.unwrap();
        let mut bob_sub = hub.connect(bob.id).await.unwrap();

        let root = service
            .create(post.post_id, bob.id, &input("first", None))
            .await
            .unwrap();
        let msg = alice.receiver.recv().await.unwrap();
        assert_eq!(msg.kind, MessageKind::Comment);
        assert_eq!(msg.payload["comment_id"], root.comment_id);

        service
            .create(post.post_id, post.author_id, &input("reply", Some(root.comment_id)))
            .await
            .unwrap();
        let msg = bob_sub.receiver.recv().await.unwrap();
        assert_eq!(msg.from, post.author_id);
        assert!(alice.receiver.try_recv().is_err());

        let thread = service.replies(root.comment_id, 1, 10).unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(service.top_level(post.post_id, 1, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_authors_edit_or_delete_comments() {
        let pool = memory_pool().unwrap();
        let hub = ConnectionHub::spawn(&HubConfig::default());
        let service = CommentService::new(pool.clone(), hub);
        let post = seed_post(&pool, "alice", "p", 1);
        let bob = users::ensure_user(&pool, "bob").unwrap();
        let root = service
            .create(post.post_id, bob.id, &input("first", None))
            .await
            .unwrap();
        let reply = service
            .create(post.post_id, post.author_id, &input("second", Some(root.comment_id)))
            .await
            .unwrap();

        assert!(matches!(
            service.update(root.comment_id, post.author_id, "mine now").unwrap_err(),
            AppError::Forbidden
        ));
        assert!(matches!(
            service.update(root.comment_id, bob.id, " ").unwrap_err(),
            AppError::BadRequest(_)
        ));
        let edited = service.update(root.comment_id, bob.id, "fixed typo").unwrap();
        assert_eq!(edited.content, "fixed typo");

        assert_eq!(service.reply_count(reply.comment_id).unwrap(), 1);
        assert_eq!(
            service.post_counts(post.post_id).unwrap(),
            CommentCounts { total: 2, top_level: 1 }
        );
        assert_eq!(service.user_count(bob.id).unwrap(), 1);

        assert!(matches!(
            service.delete(root.comment_id, post.author_id).unwrap_err(),
            AppError::Forbidden
        ));
        assert_eq!(service.delete(root.comment_id, bob.id).unwrap(), 2);
        assert!(matches!(service.get(reply.comment_id).unwrap_err(), AppError::NotFound));
        assert!(matches!(
            service.post_counts(99).unwrap_err(),
            AppError::NotFound
        ));
    }

    #[tokio::test]
    async fn empty_comments_are_rejected() {
        let pool = memory_pool().unwrap();
        let hub = ConnectionHub::spawn(&HubConfig::default());
        let service = CommentService::new(pool.clone(), hub);
        let post = seed_post(&pool, "alice", "p", 1);
        let err = service
            .create(post.post_id, post.author_id, &input("   ", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(matches!(
            service.replies(42, 1, 10).unwrap_err(),
            AppError::NotFound
        ));
    }
}
