//! Keyed request coalescing.
//!
//! Concurrent callers that share a key wait on a single in-flight producer
//! and all receive a clone of its result. Nothing is remembered once the
//! producer finishes: the next caller for that key starts a fresh call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct Coalescer<T, E> {
    in_flight: Arc<Mutex<HashMap<String, Flight<T, E>>>>,
}

impl<T, E> Clone for Coalescer<T, E> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T, E> Default for Coalescer<T, E> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` unless a call for `key` is already in flight, in which
    /// case wait for that call instead. The producer keeps running if the
    /// caller that started it goes away, as long as anyone still waits.
    pub async fn run<F, Fut>(&self, key: impl Into<String>, producer: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let flight = {
            let mut in_flight = self.lock();
            match in_flight.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = producer().boxed().shared();
                    in_flight.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut in_flight = self.lock();
        if in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&flight))
        {
            in_flight.remove(&key);
        }
        result
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Flight<T, E>>> {
        // Only map operations run under the lock, so a poisoned map is still consistent.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Deterministic coalescing keys, one per operation.
pub mod keys {
    use crate::cache::Order;
    use crate::pipeline::SubjectKind;

    pub fn post_list(order: Order, page: i64, page_size: i64) -> String {
        format!("post_list_{}_{}_{}", order.as_str(), page, page_size)
    }

    pub fn post_detail(post_id: i64) -> String {
        format!("post_detail_{}", post_id)
    }

    pub fn vote(kind: SubjectKind, subject_id: i64, user_id: i64) -> String {
        format!("vote_{}_{}_{}", kind.as_str(), subject_id, user_id)
    }

    pub fn vote_count(kind: SubjectKind, subject_id: i64) -> String {
        format!("vote_count_{}_{}", kind.as_str(), subject_id)
    }
}
