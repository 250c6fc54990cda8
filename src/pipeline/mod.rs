//! Asynchronous vote processing.
//!
//! Request handlers submit a [`VoteIntent`] and return immediately. Intents
//! travel over an [`IntentTransport`] partitioned by subject, and one
//! [`worker::VoteWorker`] per partition persists each vote, moves the post's
//! hotness score and notifies the subject's author.

pub mod dead_letter;
pub mod transport;
pub mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use transport::{ChannelTransport, PartitionReceiver};
pub use worker::{Outcome, Stage, VoteWorker};

use crate::coalesce::{keys, Coalescer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Post,
    Comment,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Post => "post",
            SubjectKind::Comment => "comment",
        }
    }
}

/// Requested vote direction. Only an upvote is recorded; zero and minus one
/// both withdraw an existing vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum VoteValue {
    Down,
    Neutral,
    Up,
}

impl VoteValue {
    pub fn is_upvote(self) -> bool {
        self == VoteValue::Up
    }
}

impl TryFrom<i8> for VoteValue {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(VoteValue::Down),
            0 => Ok(VoteValue::Neutral),
            1 => Ok(VoteValue::Up),
            other => Err(format!("vote must be -1, 0 or 1, got {}", other)),
        }
    }
}

impl From<VoteValue> for i8 {
    fn from(value: VoteValue) -> Self {
        match value {
            VoteValue::Down => -1,
            VoteValue::Neutral => 0,
            VoteValue::Up => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteIntent {
    pub subject_id: i64,
    pub subject_kind: SubjectKind,
    pub user_id: i64,
    pub vote: VoteValue,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("malformed intent: {0}")]
    Decode(String),
}

/// Publish side of the intent transport.
#[async_trait]
pub trait IntentTransport: Send + Sync {
    /// Hand the intent to the transport, waiting for capacity if needed.
    async fn publish(&self, intent: &VoteIntent) -> Result<(), TransportError>;

    /// Intents published but not yet picked up by a worker.
    fn backlog(&self) -> usize;
}

/// Request-side entry point of the pipeline.
#[derive(Clone)]
pub struct VotePipeline {
    transport: Arc<dyn IntentTransport>,
    coalescer: Coalescer<(), TransportError>,
}

impl VotePipeline {
    pub fn new(transport: Arc<dyn IntentTransport>) -> Self {
        Self {
            transport,
            coalescer: Coalescer::new(),
        }
    }

    /// Enqueue an intent. Concurrent submissions from the same user for the
    /// same subject share a single publish.
    pub async fn submit(&self, intent: VoteIntent) -> Result<(), TransportError> {
        let transport = Arc::clone(&self.transport);
        self.coalescer
            .run(
                keys::vote(intent.subject_kind, intent.subject_id, intent.user_id),
                move || async move { transport.publish(&intent).await },
            )
            .await
    }

    pub fn backlog(&self) -> usize {
        self.transport.backlog()
    }
}
