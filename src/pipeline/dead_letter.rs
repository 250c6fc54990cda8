use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::{Stage, VoteIntent};

/// An intent that failed and was not applied.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub intent: VoteIntent,
    pub stage: Stage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Bounded record of failed intents, oldest evicted first. Entries are kept
/// for inspection only; nothing replays them.
#[derive(Clone)]
pub struct DeadLetterQueue {
    capacity: usize,
    letters: Arc<Mutex<VecDeque<DeadLetter>>>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            letters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub async fn push(&self, letter: DeadLetter) {
        let mut letters = self.letters.lock().await;
        if letters.len() >= self.capacity {
            letters.pop_front();
        }
        letters.push_back(letter);
    }

    /// All retained letters, oldest first.
    pub async fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }
}
