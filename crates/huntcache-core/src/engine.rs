//! `CacheEngine`: the entry points a hosting adapter wires to its transport.
//!
//! - `handle_request` for every intercepted request
//! - `on_install` / `on_activate` for the two lifecycle events
//! - `handle_control_message` for out-of-band commands from the application

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::control::{send_reply, BucketStats, ControlMessage, ControlReply, ReplyPort};
use crate::error::{CacheError, CacheResult};
use crate::fetch::Fetcher;
use crate::freshness::{Clock, SystemClock};
use crate::lifecycle::{Activation, Lifecycle, LifecycleState};
use crate::registry::{BucketKind, BucketRegistry};
use crate::request::{parse_url, Request, RequestKey, Response};
use crate::route::{Route, RouteClassifier};
use crate::store::CacheStore;
use crate::strategy::{Outcome, StrategyEngine};

/// What the engine did with an intercepted request.
#[derive(Debug)]
pub enum Handled {
    /// Not for the engine (non-GET, non-http, or this version is not active).
    /// The host sends the request to the network untouched.
    Passthrough,
    Served(Outcome),
}

struct Inner {
    origin: Url,
    classifier: RouteClassifier,
    strategies: StrategyEngine,
    lifecycle: Lifecycle,
}

/// One version of the caching engine. Clone is cheap; clones share state.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

impl CacheEngine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> CacheResult<Self> {
        Self::with_clock(config, store, fetcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &EngineConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let origin = parse_url(&config.origin)?;
        let resolve_all = |paths: &[String]| -> CacheResult<Vec<Url>> {
            paths.iter().map(|p| resolve(&origin, p)).collect()
        };
        let precache = resolve_all(&config.precache)?;
        let prefetch = resolve_all(&config.prefetch)?;
        let shell = if config.shell_url.is_empty() {
            None
        } else {
            Some(RequestKey::get(&resolve(&origin, &config.shell_url)?))
        };

        let registry = Arc::new(BucketRegistry::new(
            &config.app_prefix,
            &config.version,
            store,
            |kind| config.buckets.settings(kind),
        ));
        info!(
            version = %config.version,
            store = registry.store_name(),
            "Cache engine created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                origin,
                classifier: RouteClassifier::new(config.routes.clone()),
                strategies: StrategyEngine::new(registry, fetcher, clock, shell),
                lifecycle: Lifecycle::new(precache, prefetch),
            }),
        })
    }

    fn registry(&self) -> &BucketRegistry {
        self.inner.strategies.registry()
    }

    pub fn version(&self) -> &str {
        self.registry().version()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.lifecycle.subscribe()
    }

    /// Resolve a possibly relative URL against the configured origin
    pub fn resolve(&self, url: &str) -> CacheResult<Url> {
        resolve(&self.inner.origin, url)
    }

    pub fn classify(&self, request: &Request) -> Option<Route> {
        self.inner.classifier.classify(request)
    }

    pub fn ttl(&self, kind: BucketKind) -> Duration {
        self.registry().ttl(kind)
    }

    /// Change a bucket's TTL at runtime; stored entries are judged against the new value.
    pub fn set_ttl(&self, kind: BucketKind, ttl: Duration) {
        info!(bucket = %kind, ttl = ?ttl, "Bucket TTL changed");
        self.registry().set_ttl(kind, ttl);
    }

    pub async fn handle_request(&self, request: &Request) -> CacheResult<Handled> {
        let Some(route) = self.classify(request) else {
            return Ok(Handled::Passthrough);
        };
        let Some(key) = RequestKey::for_request(request) else {
            return Ok(Handled::Passthrough);
        };
        if self.state() != LifecycleState::Activated {
            debug!(key = %key, state = %self.state(), "Not controlling, passing through");
            return Ok(Handled::Passthrough);
        }

        debug!(key = %key, bucket = %route.bucket, strategy = ?route.strategy, "Routing request");
        let outcome = self
            .inner
            .strategies
            .execute(route.strategy, request, &key, route.bucket)
            .await?;
        Ok(Handled::Served(outcome))
    }

    /// Precache the manifest. If SKIP_WAITING arrived meanwhile, activation
    /// follows immediately and its result is returned.
    pub async fn on_install(&self) -> CacheResult<Option<Activation>> {
        self.inner.lifecycle.install(&self.inner.strategies).await?;
        if self.inner.lifecycle.skip_waiting_requested() {
            return self.on_activate().await.map(Some);
        }
        Ok(None)
    }

    pub async fn on_activate(&self) -> CacheResult<Activation> {
        self.inner.lifecycle.activate(&self.inner.strategies).await
    }

    /// Parse and dispatch a raw envelope; unknown messages are ignored.
    pub async fn handle_control_json(
        &self,
        envelope: &Value,
        reply: Option<ReplyPort>,
    ) -> CacheResult<()> {
        match ControlMessage::from_json(envelope) {
            Some(message) => self.handle_control_message(message, reply).await,
            None => Ok(()),
        }
    }

    pub async fn handle_control_message(
        &self,
        message: ControlMessage,
        reply: Option<ReplyPort>,
    ) -> CacheResult<()> {
        debug!(message = ?message, "Control message");
        match message {
            ControlMessage::SkipWaiting => {
                if self.inner.lifecycle.request_skip_waiting() {
                    self.on_activate().await?.prefetch.detach();
                }
                Ok(())
            }
            ControlMessage::ClearCache => match self.clear().await {
                Ok(_) => {
                    send_reply(reply, ControlReply::Ack { success: true });
                    Ok(())
                }
                Err(e) => {
                    send_reply(reply, ControlReply::Ack { success: false });
                    Err(e)
                }
            },
            ControlMessage::CacheRoute { url } => self.cache_route(&url).await,
            ControlMessage::GetCacheStats => {
                let stats = self.stats().await?;
                send_reply(reply, ControlReply::Stats(stats));
                Ok(())
            }
        }
    }

    /// Delete every bucket of this application, whatever its version.
    /// Returns the physical names deleted.
    pub async fn clear(&self) -> CacheResult<Vec<String>> {
        let registry = self.registry();
        let mut deleted = Vec::new();
        for name in registry.list_bucket_names().await? {
            if registry.is_app_bucket(&name) {
                registry.delete_bucket(&name).await?;
                deleted.push(name);
            }
        }
        info!(deleted = deleted.len(), "Cleared all buckets");
        Ok(deleted)
    }

    /// Entry count per logical bucket of the current version
    pub async fn stats(&self) -> CacheResult<BTreeMap<String, BucketStats>> {
        let registry = self.registry();
        let mut stats = BTreeMap::new();
        for kind in BucketKind::ALL {
            let count = registry.keys(kind).await?.len();
            stats.insert(
                kind.as_str().to_string(),
                BucketStats {
                    count,
                    cache_name: registry.full_name(kind),
                },
            );
        }
        Ok(stats)
    }

    /// Fetch a route into the pages bucket. A network failure is logged and
    /// otherwise ignored; a storage failure is returned.
    pub async fn cache_route(&self, url: &str) -> CacheResult<()> {
        let request = Request::new(Method::GET, self.resolve(url)?);
        let key = RequestKey::get(&request.url);
        match self
            .inner
            .strategies
            .fetch_and_store(&request, &key, BucketKind::Pages)
            .await
        {
            Ok(_) => {
                debug!(key = %key, "Cached route on request");
                Ok(())
            }
            Err(CacheError::Network(e)) => {
                warn!(key = %key, error = %e, "Could not cache route");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Serve purely from the current version's buckets, never touching the
    /// network. The request's own bucket is searched first.
    pub async fn match_cached(&self, request: &Request) -> CacheResult<Response> {
        let not_found = || CacheError::NotFoundInCache {
            url: request.url.to_string(),
        };
        let Some(key) = RequestKey::for_request(request) else {
            return Err(not_found());
        };

        let preferred = self.classify(request).map(|route| route.bucket);
        let order: Vec<BucketKind> = preferred
            .into_iter()
            .chain(BucketKind::ALL.into_iter().filter(|k| Some(*k) != preferred))
            .collect();

        match self.registry().match_any(&key, &order).await? {
            Some((_, entry)) => Ok(entry.response),
            None => Err(not_found()),
        }
    }
}

fn resolve(origin: &Url, url: &str) -> CacheResult<Url> {
    origin.join(url).map_err(|e| CacheError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::ManualClock;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedFetcher;
    use tokio::sync::oneshot;

    fn config() -> EngineConfig {
        EngineConfig {
            app_prefix: "hc".to_string(),
            version: "v1".to_string(),
            origin: "https://app.example/".to_string(),
            precache: vec!["/index.html".to_string()],
            prefetch: Vec::new(),
            ..EngineConfig::default()
        }
    }

    fn engine(fetcher: Arc<ScriptedFetcher>) -> CacheEngine {
        CacheEngine::with_clock(
            &config(),
            Arc::new(MemoryStore::new()),
            fetcher,
            Arc::new(ManualClock::default()),
        )
        .unwrap()
    }

    fn shell_fetcher() -> Arc<ScriptedFetcher> {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("https://app.example/index.html", Response::ok("<shell>"));
        fetcher
    }

    #[test]
    fn test_huge_configured_ttl_does_not_wrap() {
        let json = r#"{"buckets": {"api": {"ttlSecs": 18446744073709552}}}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        let engine = CacheEngine::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedFetcher::new()),
        )
        .unwrap();

        assert_eq!(engine.ttl(BucketKind::Api), Duration::from_millis(u64::MAX));
        assert_eq!(engine.ttl(BucketKind::Pages), Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_passthrough_until_activated() {
        let fetcher = shell_fetcher();
        let engine = engine(fetcher.clone());
        let request = Request::get("https://app.example/maps").unwrap();

        assert!(matches!(engine.handle_request(&request).await.unwrap(), Handled::Passthrough));
        engine.on_install().await.unwrap();
        assert!(matches!(engine.handle_request(&request).await.unwrap(), Handled::Passthrough));

        engine.on_activate().await.unwrap().prefetch.detach();
        match engine.handle_request(&request).await.unwrap() {
            Handled::Served(outcome) => assert_eq!(outcome.response.body, b"<shell>"),
            Handled::Passthrough => panic!("expected the engine to serve"),
        }
    }

    #[tokio::test]
    async fn test_skip_waiting_activates_installed_version() {
        let engine = engine(shell_fetcher());
        engine.on_install().await.unwrap();
        assert_eq!(engine.state(), LifecycleState::Installed);

        engine
            .handle_control_message(ControlMessage::SkipWaiting, None)
            .await
            .unwrap();
        assert_eq!(engine.state(), LifecycleState::Activated);
    }

    #[tokio::test]
    async fn test_skip_waiting_before_install_activates_after_it() {
        let engine = engine(shell_fetcher());
        engine
            .handle_control_message(ControlMessage::SkipWaiting, None)
            .await
            .unwrap();
        assert_eq!(engine.state(), LifecycleState::Parsed);

        let activation = engine.on_install().await.unwrap();
        assert!(activation.is_some());
        assert_eq!(engine.state(), LifecycleState::Activated);
    }

    #[tokio::test]
    async fn test_cache_route_and_stats() {
        let fetcher = shell_fetcher();
        fetcher.respond("https://app.example/shop", Response::ok("<shop>"));
        let engine = engine(fetcher);

        engine
            .handle_control_json(&serde_json::json!({"type": "CACHE_ROUTE", "payload": {"url": "/shop"}}), None)
            .await
            .unwrap();
        // Offline routes are logged, not errors
        engine.cache_route("/offline-page").await.unwrap();

        let (tx, rx) = oneshot::channel();
        engine
            .handle_control_message(ControlMessage::GetCacheStats, Some(tx))
            .await
            .unwrap();
        let ControlReply::Stats(stats) = rx.await.unwrap() else {
            panic!("expected stats");
        };
        assert_eq!(stats["pages"].count, 1);
        assert_eq!(stats["pages"].cache_name, "hc-pages-v1");
        assert_eq!(stats["api"].count, 0);
        assert_eq!(stats.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_control_message_is_ignored() {
        let engine = engine(shell_fetcher());
        let (tx, rx) = oneshot::channel();
        engine
            .handle_control_json(&serde_json::json!({"type": "NOPE"}), Some(tx))
            .await
            .unwrap();
        assert!(rx.await.is_err());
        assert_eq!(engine.state(), LifecycleState::Parsed);
    }

    #[tokio::test]
    async fn test_match_cached() {
        let engine = engine(shell_fetcher());
        engine.on_install().await.unwrap();

        // The shell was precached into the static bucket
        let shell = Request::get("https://app.example/index.html").unwrap();
        assert_eq!(engine.match_cached(&shell).await.unwrap().body, b"<shell>");

        let missing = Request::get("https://app.example/maps").unwrap();
        assert!(matches!(
            engine.match_cached(&missing).await,
            Err(CacheError::NotFoundInCache { .. })
        ));

        let post = Request::new(Method::POST, shell.url.clone());
        assert!(engine.match_cached(&post).await.is_err());
    }

    #[test]
    fn test_invalid_origin() {
        let mut bad = config();
        bad.origin = "not a url".to_string();
        let result = CacheEngine::new(&bad, Arc::new(MemoryStore::new()), Arc::new(ScriptedFetcher::new()));
        assert!(matches!(result, Err(CacheError::InvalidUrl { .. })));
    }
}
