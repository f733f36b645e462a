//! Offline response-caching engine for the hunting assistant.
//!
//! Every intercepted request is classified into a bucket and a strategy,
//! then served by one of four algorithms:
//!
//! - cache-first: images, fonts, slow-changing API data
//! - network-first: the rest of the API
//! - stale-while-revalidate: scripts, styles and catalog-like API data
//! - network-first with offline fallback: page navigations
//!
//! Buckets are versioned (`{appPrefix}-{kind}-{version}`). Installing a new
//! version precaches the app shell all-or-nothing; activating it deletes the
//! buckets of older versions. The host drives the engine through
//! `CacheEngine` and supplies the storage backend and the network transport.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod lifecycle;
pub mod registry;
pub mod request;
pub mod route;
pub mod store;
pub mod strategy;
pub mod task;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::EngineConfig;
pub use control::{BucketStats, ControlMessage, ControlReply, ReplyPort};
pub use engine::{CacheEngine, Handled};
pub use error::{CacheError, CacheResult, NetworkError};
pub use fetch::{Fetcher, ReqwestFetcher};
pub use freshness::{Clock, ManualClock, SystemClock};
pub use lifecycle::{Activation, LifecycleState};
pub use registry::{Bucket, BucketKind};
pub use request::{Destination, Request, RequestKey, Response};
pub use route::Route;
pub use store::{CacheEntry, CacheStore, FsStore, MemoryStore};
pub use strategy::{Outcome, Source, StrategyKind};
pub use task::BackgroundTask;
