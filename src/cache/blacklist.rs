use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::keys;
use super::{Batch, CacheBackend, CacheResult};

/// Revoked session tokens. Entries expire together with the token itself.
#[derive(Clone)]
pub struct TokenBlacklist {
    backend: Arc<dyn CacheBackend>,
}

impl TokenBlacklist {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Revoke `token` until `expires_at`. Tokens that already expired are
    /// not written.
    pub async fn add(&self, token: &str, expires_at: DateTime<Utc>) -> CacheResult<()> {
        let Ok(remaining) = (expires_at - Utc::now()).to_std() else {
            return Ok(());
        };
        if remaining.is_zero() {
            return Ok(());
        }
        let batch = Batch::new().set(keys::blacklisted_token(token), "1".to_string(), Some(remaining));
        self.backend.exec(batch).await
    }

    pub async fn contains(&self, token: &str) -> CacheResult<bool> {
        self.backend.exists(&keys::blacklisted_token(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::time::Duration;

    fn blacklist() -> TokenBlacklist {
        TokenBlacklist::new(Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn revoked_token_is_reported() {
        let list = blacklist();
        list.add("tok", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(list.contains("tok").await.unwrap());
        assert!(!list.contains("other").await.unwrap());
    }

    #[tokio::test]
    async fn expired_token_is_not_written() {
        let list = blacklist();
        list.add("old", Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert!(!list.contains("old").await.unwrap());
    }

    #[tokio::test]
    async fn entry_expires_with_token() {
        let list = blacklist();
        list.add("short", Utc::now() + chrono::Duration::milliseconds(50))
            .await
            .unwrap();
        assert!(list.contains("short").await.unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!list.contains("short").await.unwrap());
    }
}
