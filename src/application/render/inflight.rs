use std::{future::Future, sync::Arc};

use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use thiserror::Error;

use crate::{application::upstream::UpstreamError, cache::CacheKey};

#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Upstream(Arc<UpstreamError>),
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

pub type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, FetchFailure>>>;

/// Tracks cache misses that currently have an upstream fetch running.
///
/// The first requester for a key starts the fetch on its own task; later
/// requesters for the same key await the same result. The entry is dropped as
/// soon as the fetch finishes, successfully or not, so a failed fetch is never
/// replayed to later requests.
#[derive(Default, Clone)]
pub struct InFlightFetches {
    fetches: Arc<DashMap<CacheKey, SharedFetch>>,
}

/// Whether the caller started the fetch or joined an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRole {
    Leader,
    Follower,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self {
            fetches: Arc::new(DashMap::new()),
        }
    }

    /// Join the fetch for `key`, starting it with `start` when none is running.
    pub fn join<F, Fut>(&self, key: &CacheKey, start: F) -> (SharedFetch, FetchRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, FetchFailure>> + Send + 'static,
    {
        match self.fetches.entry(key.clone()) {
            Entry::Occupied(occupied) => (occupied.get().clone(), FetchRole::Follower),
            Entry::Vacant(vacant) => {
                let fetches = Arc::clone(&self.fetches);
                let owned_key = key.clone();
                let work = start();
                // The entry guard is held until `insert` returns, so the
                // removal below cannot run before the entry exists.
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    fetches.remove(&owned_key);
                    result
                });
                let shared = async move {
                    handle
                        .await
                        .unwrap_or_else(|err| Err(FetchFailure::Aborted(err.to_string())))
                }
                .boxed()
                .shared();
                vacant.insert(shared.clone());
                (shared, FetchRole::Leader)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fetches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn followers_share_the_leader_result() {
        let inflight = InFlightFetches::new();
        let key = CacheKey::derive("Hello", "ackaisyo.ttf");
        let starts = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let counter = Arc::clone(&starts);
        let (leader, role) = inflight.join(&key, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = gate.await;
                Ok(Bytes::from_static(b"mesh"))
            }
        });
        assert_eq!(role, FetchRole::Leader);

        let counter = Arc::clone(&starts);
        let (follower, role) = inflight.join(&key, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Bytes::new()) }
        });
        assert_eq!(role, FetchRole::Follower);
        assert_eq!(inflight.len(), 1);

        release.send(()).expect("release leader");
        let (first, second) = tokio::join!(leader, follower);

        assert_eq!(first.expect("leader result"), Bytes::from_static(b"mesh"));
        assert_eq!(second.expect("follower result"), Bytes::from_static(b"mesh"));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_is_not_replayed() {
        let inflight = InFlightFetches::new();
        let key = CacheKey::derive("Hello", "ackaisyo.ttf");

        let (failed, _) = inflight.join(&key, || async {
            Err(FetchFailure::Aborted("backend down".into()))
        });
        assert!(failed.await.is_err());
        assert!(inflight.is_empty());

        let (retried, role) = inflight.join(&key, || async { Ok(Bytes::from_static(b"ok")) });
        assert_eq!(role, FetchRole::Leader);
        assert_eq!(retried.await.expect("second fetch"), Bytes::from_static(b"ok"));
    }
}
