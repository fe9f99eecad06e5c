//! Cache-or-fetch orchestration for render requests.

mod inflight;

pub use inflight::{FetchFailure, FetchRole, InFlightFetches, SharedFetch};

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    application::upstream::{UpstreamError, UpstreamFetcher},
    cache::{BlobStore, CacheKey},
    domain::render::RenderRequest,
};

pub const METRIC_CACHE_HIT_TOTAL: &str = "meshx_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "meshx_cache_miss_total";
pub const METRIC_CACHE_COALESCED_TOTAL: &str = "meshx_cache_coalesced_total";
pub const METRIC_CACHE_READ_ERROR_TOTAL: &str = "meshx_cache_read_error_total";
pub const METRIC_CACHE_STORE_ERROR_TOTAL: &str = "meshx_cache_store_error_total";
pub const METRIC_UPSTREAM_ERROR_TOTAL: &str = "meshx_upstream_error_total";
pub const METRIC_UPSTREAM_FETCH_MS: &str = "meshx_upstream_fetch_ms";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("upstream fetch failed for key {key}")]
    Upstream {
        key: CacheKey,
        #[source]
        source: Arc<UpstreamError>,
    },
    #[error("fetch for key {key} was aborted: {reason}")]
    Aborted { key: CacheKey, reason: String },
}

/// How the bytes of a [`RenderOutcome`] were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the blob store.
    Hit,
    /// Fetched from upstream by this request.
    Miss,
    /// Fetched from upstream by a concurrent request for the same key.
    Coalesced,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Coalesced => "COALESCED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub key: CacheKey,
    pub bytes: Bytes,
    pub status: CacheStatus,
}

/// Serves render requests from the blob store, falling back to the upstream
/// renderer on a miss and persisting what it returns.
///
/// A failed store write never fails the request: the fresh bytes are still
/// returned and the entry is simply fetched again next time.
pub struct RenderService {
    store: Arc<dyn BlobStore>,
    upstream: Arc<dyn UpstreamFetcher>,
    inflight: Option<InFlightFetches>,
}

impl RenderService {
    /// Build a service where concurrent misses for one key each fetch upstream.
    pub fn new(store: Arc<dyn BlobStore>, upstream: Arc<dyn UpstreamFetcher>) -> Self {
        Self {
            store,
            upstream,
            inflight: None,
        }
    }

    /// Share a single upstream fetch between concurrent misses for one key.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(InFlightFetches::new);
        self
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RenderError> {
        let started_at = Instant::now();
        let key = CacheKey::for_request(request);

        match self.store.get(&key).await {
            Ok(Some(bytes)) => {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                info!(
                    target = "meshx::render",
                    op = "render::render",
                    result = "cache_hit",
                    key = %key,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    bytes = bytes.len(),
                    "Artifact served from cache"
                );
                return Ok(RenderOutcome {
                    key,
                    bytes,
                    status: CacheStatus::Hit,
                });
            }
            Ok(None) => {}
            Err(err) => {
                counter!(METRIC_CACHE_READ_ERROR_TOTAL).increment(1);
                warn!(
                    target = "meshx::render",
                    op = "render::render",
                    result = "cache_read_error",
                    key = %key,
                    error = %err,
                    "Failed to read cached artifact; fetching from upstream"
                );
            }
        }

        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);

        let (result, status) = match &self.inflight {
            Some(inflight) => {
                let (fetch, role) = inflight.join(&key, || {
                    fetch_unless_stored(
                        Arc::clone(&self.store),
                        Arc::clone(&self.upstream),
                        request.clone(),
                        key.clone(),
                    )
                });
                let status = match role {
                    FetchRole::Leader => CacheStatus::Miss,
                    FetchRole::Follower => {
                        counter!(METRIC_CACHE_COALESCED_TOTAL).increment(1);
                        CacheStatus::Coalesced
                    }
                };
                (fetch.await, status)
            }
            None => {
                let result = fetch_and_store(
                    Arc::clone(&self.store),
                    Arc::clone(&self.upstream),
                    request.clone(),
                    key.clone(),
                )
                .await;
                (result, CacheStatus::Miss)
            }
        };

        let bytes = result.map_err(|failure| match failure {
            FetchFailure::Upstream(source) => RenderError::Upstream {
                key: key.clone(),
                source,
            },
            FetchFailure::Aborted(reason) => RenderError::Aborted {
                key: key.clone(),
                reason,
            },
        })?;

        info!(
            target = "meshx::render",
            op = "render::render",
            result = "cache_miss",
            status = status.as_str(),
            key = %key,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "Artifact fetched from upstream"
        );

        Ok(RenderOutcome { key, bytes, status })
    }
}

/// A leader may start right after an earlier fetch for the same key stored its
/// entry and left the in-flight map, so look again before calling upstream.
async fn fetch_unless_stored(
    store: Arc<dyn BlobStore>,
    upstream: Arc<dyn UpstreamFetcher>,
    request: RenderRequest,
    key: CacheKey,
) -> Result<Bytes, FetchFailure> {
    if let Ok(Some(bytes)) = store.get(&key).await {
        debug!(
            target = "meshx::render",
            op = "render::fetch",
            result = "stored_meanwhile",
            key = %key,
            "Entry was stored by a fetch that just finished"
        );
        return Ok(bytes);
    }

    fetch_and_store(store, upstream, request, key).await
}

async fn fetch_and_store(
    store: Arc<dyn BlobStore>,
    upstream: Arc<dyn UpstreamFetcher>,
    request: RenderRequest,
    key: CacheKey,
) -> Result<Bytes, FetchFailure> {
    let fetch_started_at = Instant::now();
    let fetched = upstream.fetch(request.text(), request.font()).await;
    let fetch_elapsed = fetch_started_at.elapsed();
    histogram!(METRIC_UPSTREAM_FETCH_MS).record(fetch_elapsed.as_secs_f64() * 1000.0);

    let bytes = match fetched {
        Ok(bytes) => bytes,
        Err(err) => {
            counter!(METRIC_UPSTREAM_ERROR_TOTAL).increment(1);
            error!(
                target = "meshx::render",
                op = "render::fetch",
                result = "error",
                text = request.text(),
                font = request.font(),
                key = %key,
                fetch_elapsed_ms = fetch_elapsed.as_millis() as u64,
                error = %err,
                "Upstream render failed"
            );
            return Err(FetchFailure::Upstream(Arc::new(err)));
        }
    };

    if let Err(err) = store.put(&key, bytes.clone()).await {
        counter!(METRIC_CACHE_STORE_ERROR_TOTAL).increment(1);
        warn!(
            target = "meshx::render",
            op = "render::store",
            result = "store_error",
            key = %key,
            bytes = bytes.len(),
            error = %err,
            "Failed to persist artifact; serving it uncached"
        );
    }

    Ok(bytes)
}
