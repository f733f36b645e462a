//! The four caching strategies.
//!
//! Network failures are the only recoverable condition: each strategy falls
//! back to cache where it defines a fallback, and the stale-while-revalidate
//! background leg just logs them. Storage failures always propagate.
//!
//! There is no per-key locking. Two concurrent misses for the same key both
//! fetch, and whichever write lands last wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::fetch::{fetch_ok, Fetcher};
use crate::freshness::{self, Clock};
use crate::registry::{BucketKind, BucketRegistry};
use crate::request::{Request, RequestKey, Response};
use crate::store::CacheEntry;
use crate::task::BackgroundTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkFirstWithOfflineFallback,
}

/// Where the response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A bucket entry (fresh for cache-first, any age for the fallbacks)
    Cache,
    /// An expired bucket entry served because the network failed
    StaleCache,
    Network,
    /// The app shell, standing in for an uncached page
    Shell,
    /// The synthetic 503
    Offline,
}

/// Result of running a strategy.
#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
    pub source: Source,
    /// Set when a background revalidation was started
    pub revalidation: Option<BackgroundTask>,
}

impl Outcome {
    fn new(response: Response, source: Source) -> Self {
        Self {
            response,
            source,
            revalidation: None,
        }
    }
}

/// Runs strategies against one version's buckets. Clone is cheap.
#[derive(Clone)]
pub struct StrategyEngine {
    registry: Arc<BucketRegistry>,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    /// Document served to navigations when neither network nor cache can answer
    shell: Option<RequestKey>,
}

impl StrategyEngine {
    pub fn new(
        registry: Arc<BucketRegistry>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        shell: Option<RequestKey>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            clock,
            shell,
        }
    }

    pub fn registry(&self) -> &BucketRegistry {
        &self.registry
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn execute(
        &self,
        kind: StrategyKind,
        request: &Request,
        key: &RequestKey,
        bucket: BucketKind,
    ) -> CacheResult<Outcome> {
        match kind {
            StrategyKind::CacheFirst => self.cache_first(request, key, bucket).await,
            StrategyKind::NetworkFirst => self.network_first(request, key, bucket).await,
            StrategyKind::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, key, bucket).await
            }
            StrategyKind::NetworkFirstWithOfflineFallback => {
                self.network_first_with_offline_fallback(request, key, bucket)
                    .await
            }
        }
    }

    /// Fetch, and on HTTP-OK stamp and store the response before returning it.
    pub async fn fetch_and_store(
        &self,
        request: &Request,
        key: &RequestKey,
        bucket: BucketKind,
    ) -> CacheResult<Response> {
        let response = fetch_ok(self.fetcher.as_ref(), request).await?;
        let stamped = freshness::stamp(response.clone(), self.clock.now());
        self.registry
            .put(bucket, CacheEntry::new(key.clone(), stamped))
            .await?;
        Ok(response)
    }

    /// Serve a fresh entry without touching the network; otherwise fetch, and
    /// if that fails fall back to the expired entry when there is one.
    pub async fn cache_first(
        &self,
        request: &Request,
        key: &RequestKey,
        bucket: BucketKind,
    ) -> CacheResult<Outcome> {
        let cached = self.registry.get(bucket, key).await?;
        if let Some(entry) = &cached {
            let ttl = self.registry.ttl(bucket);
            if !freshness::is_expired(&entry.response, ttl, self.clock.now()) {
                debug!(bucket = %bucket, key = %key, "Cache hit");
                return Ok(Outcome::new(entry.response.clone(), Source::Cache));
            }
            debug!(bucket = %bucket, key = %key, "Cache entry expired, refetching");
        } else {
            debug!(bucket = %bucket, key = %key, "Cache miss");
        }

        match self.fetch_and_store(request, key, bucket).await {
            Ok(response) => Ok(Outcome::new(response, Source::Network)),
            Err(CacheError::Network(e)) => match cached {
                Some(entry) => {
                    warn!(key = %key, error = %e, "Network failed, serving stale entry");
                    Ok(Outcome::new(entry.response, Source::StaleCache))
                }
                None => Err(CacheError::Network(e)),
            },
            Err(e) => Err(e),
        }
    }

    /// Always try the network; the cache is only a fallback, whatever its age.
    pub async fn network_first(
        &self,
        request: &Request,
        key: &RequestKey,
        bucket: BucketKind,
    ) -> CacheResult<Outcome> {
        match self.fetch_and_store(request, key, bucket).await {
            Ok(response) => Ok(Outcome::new(response, Source::Network)),
            Err(CacheError::Network(e)) => match self.registry.get(bucket, key).await? {
                Some(entry) => {
                    warn!(key = %key, error = %e, "Network failed, serving cached entry");
                    Ok(Outcome::new(entry.response, Source::Cache))
                }
                None => Err(CacheError::Network(e)),
            },
            Err(e) => Err(e),
        }
    }

    /// Answer from cache at once and refresh in the background; on a miss the
    /// caller waits for the network instead.
    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        key: &RequestKey,
        bucket: BucketKind,
    ) -> CacheResult<Outcome> {
        match self.registry.get(bucket, key).await? {
            Some(entry) => {
                debug!(bucket = %bucket, key = %key, "Serving cached entry, revalidating");
                let revalidation = self.spawn_revalidation(request.clone(), key.clone(), bucket);
                Ok(Outcome {
                    response: entry.response,
                    source: Source::Cache,
                    revalidation: Some(revalidation),
                })
            }
            None => {
                debug!(bucket = %bucket, key = %key, "Cache miss");
                let response = self.fetch_and_store(request, key, bucket).await?;
                Ok(Outcome::new(response, Source::Network))
            }
        }
    }

    fn spawn_revalidation(&self, request: Request, key: RequestKey, bucket: BucketKind) -> BackgroundTask {
        let this = self.clone();
        BackgroundTask::spawn("revalidate", async move {
            match this.fetch_and_store(&request, &key, bucket).await {
                Ok(_) => debug!(key = %key, "Revalidated"),
                Err(e) => warn!(key = %key, error = %e, "Revalidation failed"),
            }
        })
    }

    /// Network-first for navigations, ending in the app shell or a 503 instead of an error.
    pub async fn network_first_with_offline_fallback(
        &self,
        request: &Request,
        key: &RequestKey,
        bucket: BucketKind,
    ) -> CacheResult<Outcome> {
        let error = match self.fetch_and_store(request, key, bucket).await {
            Ok(response) => return Ok(Outcome::new(response, Source::Network)),
            Err(CacheError::Network(e)) => e,
            Err(e) => return Err(e),
        };

        if let Some(entry) = self.registry.get(bucket, key).await? {
            warn!(key = %key, error = %error, "Network failed, serving cached page");
            return Ok(Outcome::new(entry.response, Source::Cache));
        }

        if let Some(shell) = &self.shell {
            let buckets = [BucketKind::Static, BucketKind::Pages];
            if let Some((_, entry)) = self.registry.match_any(shell, &buckets).await? {
                warn!(key = %key, error = %error, "Network failed, serving app shell");
                return Ok(Outcome::new(entry.response, Source::Shell));
            }
        }

        warn!(key = %key, error = %error, "Network failed with nothing cached, answering offline");
        Ok(Outcome::new(Response::offline(), Source::Offline))
    }
}
