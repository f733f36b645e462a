//! Durable storage backends for cache buckets.
//!
//! A backend only knows physical bucket names and `RequestKey`s. Versioning,
//! TTLs and routing live above it in the registry and engine.
//!
//! - `MemoryStore`: in-process maps, for tests and ephemeral hosts
//! - `FsStore`: one directory per bucket, survives restarts

pub mod fs;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::freshness;
use crate::request::{RequestKey, Response};

pub use fs::FsStore;
pub use memory::MemoryStore;

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub response: Response,
}

impl CacheEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self { key, response }
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        freshness::captured_at(&self.response)
    }
}

/// Storage interface the engine is built on.
///
/// Lookups on a missing bucket or key return `Ok(None)` / an empty list; an
/// `Err` always means the backend itself failed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// A name for tracing, e.g. "memory" or "fs"
    fn name(&self) -> &'static str;

    /// Create the bucket if it does not exist. No effect otherwise.
    async fn open(&self, bucket: &str) -> Result<()>;

    async fn get(&self, bucket: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

    /// Store an entry, creating the bucket if needed and overwriting any entry with the same key.
    async fn put(&self, bucket: &str, entry: CacheEntry) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete_entry(&self, bucket: &str, key: &RequestKey) -> Result<bool>;

    async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>>;

    async fn bucket_names(&self) -> Result<Vec<String>>;

    /// Returns whether a bucket was removed
    async fn delete_bucket(&self, bucket: &str) -> Result<bool>;
}
