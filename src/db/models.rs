use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub community_id: i64,
    pub name: String,
    pub introduction: String,
    pub created_at: i64,
}

/// Cached list-view representation of a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub post_id: i64,
    pub title: String,
    pub summary: String,
    pub author_id: i64,
    pub author_name: String,
    pub community_id: i64,
    pub community_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDetail {
    pub post_id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub author_id: i64,
    pub author_name: String,
    pub community_id: i64,
    pub community_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PostDetail {
    pub fn to_summary(&self) -> PostSummary {
        PostSummary {
            post_id: self.post_id,
            title: self.title.clone(),
            summary: self.summary.clone(),
            author_id: self.author_id,
            author_name: self.author_name.clone(),
            community_id: self.community_id,
            community_name: self.community_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub content: String,
    pub reply_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub vote_count: i64,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoteCount {
    pub subject_id: i64,
    pub votes: i64,
}

/// Whether the requesting user has voted on one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub subject_id: i64,
    pub voted: bool,
}

/// One upvote on a post, with who cast it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub user_id: i64,
    pub username: String,
    pub voted_at: i64,
}
