//! Install / activate lifecycle of one engine version.
//!
//! ## Lifecycle
//! 1. **Install**: fetch the whole precache manifest; only if every fetch
//!    succeeds are the responses stored in the static bucket
//! 2. **Activate**: delete buckets of other versions, claim request
//!    interception, then prefetch common pages in the background
//!
//! A failed install leaves the version `Redundant`; it can never activate, so
//! the previous version keeps serving.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{join_all, try_join_all};
use reqwest::{Method, Url};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, CacheResult, NetworkError};
use crate::fetch::fetch_ok;
use crate::freshness;
use crate::registry::BucketKind;
use crate::request::{Request, RequestKey, Response};
use crate::store::CacheEntry;
use crate::strategy::StrategyEngine;
use crate::task::BackgroundTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    /// Installed and waiting to take over
    Installed,
    Activating,
    /// Active and intercepting requests
    Activated,
    /// Install failed; this version will never serve
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// What activation did.
#[derive(Debug)]
pub struct Activation {
    /// Physical names of the buckets that were garbage collected
    pub deleted: Vec<String>,
    /// Best-effort prefetch into the pages bucket
    pub prefetch: BackgroundTask,
}

pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
    skip_waiting: AtomicBool,
    precache: Vec<Url>,
    prefetch: Vec<Url>,
}

impl Lifecycle {
    pub fn new(precache: Vec<Url>, prefetch: Vec<Url>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Parsed);
        Self {
            state,
            skip_waiting: AtomicBool::new(false),
            precache,
            prefetch,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: LifecycleState) {
        let prev = self.state.send_replace(next);
        debug!(from = %prev, to = %next, "Lifecycle transition");
    }

    /// Record a SKIP_WAITING request. Returns true if the version is installed
    /// and should activate right now.
    pub fn request_skip_waiting(&self) -> bool {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.state() == LifecycleState::Installed
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub async fn install(&self, strategies: &StrategyEngine) -> CacheResult<()> {
        let current = self.state();
        if current != LifecycleState::Parsed {
            return Err(CacheError::InvalidState {
                operation: "install",
                state: current.to_string(),
            });
        }

        self.set_state(LifecycleState::Installing);
        info!(
            version = strategies.registry().version(),
            urls = self.precache.len(),
            "Installing"
        );

        match self.precache_all(strategies).await {
            Ok(()) => {
                self.set_state(LifecycleState::Installed);
                info!(version = strategies.registry().version(), "Installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Redundant);
                error!(version = strategies.registry().version(), error = %e, "Install failed");
                Err(e)
            }
        }
    }

    /// All-or-nothing: nothing is written unless every manifest fetch succeeded.
    async fn precache_all(&self, strategies: &StrategyEngine) -> CacheResult<()> {
        let requests: Vec<Request> = self
            .precache
            .iter()
            .map(|url| Request::new(Method::GET, url.clone()))
            .collect();

        let fetches = requests.iter().map(|request| async move {
            fetch_ok(strategies.fetcher(), request)
                .await
                .map_err(|source| (request.url.to_string(), source))
        });
        let responses: Vec<Response> = try_join_all(fetches)
            .await
            .map_err(|(url, source): (String, NetworkError)| CacheError::InstallAborted { url, source })?;

        let registry = strategies.registry();
        registry.open(BucketKind::Static).await?;
        let now = strategies.now();
        for (request, response) in requests.iter().zip(responses) {
            let entry = CacheEntry::new(RequestKey::get(&request.url), freshness::stamp(response, now));
            registry.put(BucketKind::Static, entry).await?;
        }
        Ok(())
    }

    /// Runs from `Installed`, or again from `Activated`, where it only re-collects garbage.
    pub async fn activate(&self, strategies: &StrategyEngine) -> CacheResult<Activation> {
        let current = self.state();
        if !matches!(current, LifecycleState::Installed | LifecycleState::Activated) {
            return Err(CacheError::InvalidState {
                operation: "activate",
                state: current.to_string(),
            });
        }

        self.set_state(LifecycleState::Activating);
        let deleted = match Self::collect_garbage(strategies).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.set_state(current);
                return Err(e);
            }
        };

        // Claim: from here on requests are intercepted
        self.set_state(LifecycleState::Activated);
        info!(
            version = strategies.registry().version(),
            deleted = deleted.len(),
            "Activated"
        );

        let prefetch = self.spawn_prefetch(strategies);
        Ok(Activation { deleted, prefetch })
    }

    async fn collect_garbage(strategies: &StrategyEngine) -> CacheResult<Vec<String>> {
        let registry = strategies.registry();
        let live = registry.live_names();

        let mut deleted = Vec::new();
        for name in registry.list_bucket_names().await? {
            if registry.is_app_bucket(&name) && !live.contains(&name) {
                info!(bucket = %name, "Deleting bucket from previous version");
                registry.delete_bucket(&name).await?;
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    fn spawn_prefetch(&self, strategies: &StrategyEngine) -> BackgroundTask {
        let strategies = strategies.clone();
        let urls = self.prefetch.clone();
        BackgroundTask::spawn("prefetch", async move {
            let fetches = urls.into_iter().map(|url| {
                let strategies = strategies.clone();
                async move {
                    let request = Request::new(Method::GET, url);
                    let key = RequestKey::get(&request.url);
                    if let Err(e) = strategies
                        .fetch_and_store(&request, &key, BucketKind::Pages)
                        .await
                    {
                        warn!(url = %request.url, error = %e, "Prefetch failed");
                    }
                }
            });
            join_all(fetches).await;
        })
    }
}
