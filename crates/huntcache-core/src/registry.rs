//! Bucket registry: the fixed set of named, versioned buckets of one engine version.
//!
//! A bucket's physical name is `{appPrefix}-{kind}-{version}`. Only the names of
//! the current version are live; any other name carrying the app prefix is
//! garbage to be collected at activation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::store::{CacheEntry, CacheStore};
use crate::request::RequestKey;

/// Asset class a bucket holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    Static,
    Images,
    Api,
    Fonts,
    Pages,
}

impl BucketKind {
    pub const ALL: [BucketKind; 5] = [
        BucketKind::Static,
        BucketKind::Images,
        BucketKind::Api,
        BucketKind::Fonts,
        BucketKind::Pages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Images => "images",
            Self::Api => "api",
            Self::Fonts => "fonts",
            Self::Pages => "pages",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one bucket's identity and current TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub kind: BucketKind,
    /// Physical storage name
    pub name: String,
    pub version: String,
    pub ttl: Duration,
}

/// Per-kind settings the registry is built from.
#[derive(Debug, Clone, Copy)]
pub struct BucketSettings {
    pub ttl: Duration,
    pub max_entries: Option<usize>,
}

pub struct BucketRegistry {
    prefix: String,
    version: String,
    store: Arc<dyn CacheStore>,
    /// TTL in millis, indexed by `BucketKind`; adjustable at runtime
    ttls: [AtomicU64; 5],
    max_entries: [Option<usize>; 5],
}

/// Saturates at `u64::MAX` millis rather than wrapping.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

impl BucketRegistry {
    pub fn new(
        prefix: &str,
        version: &str,
        store: Arc<dyn CacheStore>,
        settings: impl Fn(BucketKind) -> BucketSettings,
    ) -> Self {
        let ttls = BucketKind::ALL.map(|k| AtomicU64::new(ttl_millis(settings(k).ttl)));
        let max_entries = BucketKind::ALL.map(|k| settings(k).max_entries);
        Self {
            prefix: prefix.to_string(),
            version: version.to_string(),
            store,
            ttls,
            max_entries,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn full_name(&self, kind: BucketKind) -> String {
        format!("{}-{}-{}", self.prefix, kind, self.version)
    }

    /// Physical names of every bucket of the current version
    pub fn live_names(&self) -> Vec<String> {
        BucketKind::ALL.iter().map(|k| self.full_name(*k)).collect()
    }

    /// Whether a physical bucket name belongs to this application (any version)
    pub fn is_app_bucket(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    pub fn ttl(&self, kind: BucketKind) -> Duration {
        Duration::from_millis(self.ttls[kind.index()].load(Ordering::Relaxed))
    }

    /// Change a bucket's TTL. Entries already stored are judged against the new value.
    pub fn set_ttl(&self, kind: BucketKind, ttl: Duration) {
        self.ttls[kind.index()].store(ttl_millis(ttl), Ordering::Relaxed);
    }

    pub fn bucket(&self, kind: BucketKind) -> Bucket {
        Bucket {
            kind,
            name: self.full_name(kind),
            version: self.version.clone(),
            ttl: self.ttl(kind),
        }
    }

    pub async fn open(&self, kind: BucketKind) -> CacheResult<Bucket> {
        self.store
            .open(&self.full_name(kind))
            .await
            .map_err(CacheError::Storage)?;
        Ok(self.bucket(kind))
    }

    pub async fn get(&self, kind: BucketKind, key: &RequestKey) -> CacheResult<Option<CacheEntry>> {
        self.store
            .get(&self.full_name(kind), key)
            .await
            .map_err(CacheError::Storage)
    }

    pub async fn put(&self, kind: BucketKind, entry: CacheEntry) -> CacheResult<()> {
        let name = self.full_name(kind);
        debug!(bucket = %name, key = %entry.key, "Storing response");
        self.store.put(&name, entry).await.map_err(CacheError::Storage)?;

        if let Some(max) = self.max_entries[kind.index()] {
            self.trim(kind, max).await?;
        }
        Ok(())
    }

    pub async fn delete_entry(&self, kind: BucketKind, key: &RequestKey) -> CacheResult<bool> {
        self.store
            .delete_entry(&self.full_name(kind), key)
            .await
            .map_err(CacheError::Storage)
    }

    pub async fn keys(&self, kind: BucketKind) -> CacheResult<Vec<RequestKey>> {
        self.store
            .keys(&self.full_name(kind))
            .await
            .map_err(CacheError::Storage)
    }

    /// Every physical bucket in the store, including other versions and other apps
    pub async fn list_bucket_names(&self) -> CacheResult<Vec<String>> {
        self.store.bucket_names().await.map_err(CacheError::Storage)
    }

    pub async fn delete_bucket(&self, name: &str) -> CacheResult<bool> {
        self.store
            .delete_bucket(name)
            .await
            .map_err(CacheError::Storage)
    }

    /// First entry for `key` across the given buckets, in order
    pub async fn match_any(
        &self,
        key: &RequestKey,
        kinds: &[BucketKind],
    ) -> CacheResult<Option<(BucketKind, CacheEntry)>> {
        for kind in kinds {
            if let Some(entry) = self.get(*kind, key).await? {
                return Ok(Some((*kind, entry)));
            }
        }
        Ok(None)
    }

    /// Drop the oldest-stamped entries beyond `max`. Unstamped entries go first.
    async fn trim(&self, kind: BucketKind, max: usize) -> CacheResult<()> {
        let keys = self.keys(kind).await?;
        if keys.len() <= max {
            return Ok(());
        }

        let mut aged = Vec::with_capacity(keys.len());
        for key in keys {
            let captured = self.get(kind, &key).await?.and_then(|e| e.captured_at());
            aged.push((captured, key));
        }
        aged.sort();

        let excess = aged.len() - max;
        for (_, key) in aged.into_iter().take(excess) {
            debug!(bucket = %kind, key = %key, "Trimming entry over bucket cap");
            self.delete_entry(kind, &key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::stamp;
    use crate::request::Response;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use reqwest::Url;

    fn registry(max_images: Option<usize>) -> BucketRegistry {
        BucketRegistry::new("hc", "v2", Arc::new(MemoryStore::new()), |kind| BucketSettings {
            ttl: Duration::from_secs(60),
            max_entries: if kind == BucketKind::Images { max_images } else { None },
        })
    }

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse(&format!("https://app.example{}", path)).unwrap())
    }

    #[test]
    fn test_naming() {
        let registry = registry(None);
        assert_eq!(registry.full_name(BucketKind::Api), "hc-api-v2");
        assert_eq!(registry.live_names().len(), 5);
        assert!(registry.is_app_bucket("hc-api-v1"));
        assert!(!registry.is_app_bucket("hcx-api-v1"));
        assert!(!registry.is_app_bucket("other-api-v1"));
    }

    #[test]
    fn test_set_ttl() {
        let registry = registry(None);
        registry.set_ttl(BucketKind::Api, Duration::from_secs(5));
        assert_eq!(registry.bucket(BucketKind::Api).ttl, Duration::from_secs(5));
        assert_eq!(registry.ttl(BucketKind::Pages), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let huge = Duration::from_secs(18_446_744_073_709_552);
        let registry = BucketRegistry::new("hc", "v1", Arc::new(MemoryStore::new()), |_| {
            BucketSettings {
                ttl: huge,
                max_entries: None,
            }
        });
        let max = Duration::from_millis(u64::MAX);
        assert_eq!(registry.ttl(BucketKind::Api), max);

        registry.set_ttl(BucketKind::Fonts, Duration::MAX);
        assert_eq!(registry.ttl(BucketKind::Fonts), max);
    }

    #[tokio::test]
    async fn test_open_get_put() {
        let registry = registry(None);
        let bucket = registry.open(BucketKind::Pages).await.unwrap();
        assert_eq!(bucket.name, "hc-pages-v2");

        assert!(registry.get(BucketKind::Pages, &key("/")).await.unwrap().is_none());
        registry
            .put(BucketKind::Pages, CacheEntry::new(key("/"), Response::ok("home")))
            .await
            .unwrap();
        assert!(registry.get(BucketKind::Pages, &key("/")).await.unwrap().is_some());
        assert_eq!(
            registry.list_bucket_names().await.unwrap(),
            vec!["hc-pages-v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_trim_drops_oldest() {
        let registry = registry(Some(2));
        let now = Utc::now();
        for (i, path) in ["/a.png", "/b.png", "/c.png"].iter().enumerate() {
            let at = now + ChronoDuration::seconds(i as i64);
            let entry = CacheEntry::new(key(path), stamp(Response::ok("img"), at));
            registry.put(BucketKind::Images, entry).await.unwrap();
        }

        let keys = registry.keys(BucketKind::Images).await.unwrap();
        assert_eq!(keys, vec![key("/b.png"), key("/c.png")]);
    }
}
