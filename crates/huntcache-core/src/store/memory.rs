use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore};
use crate::request::RequestKey;

type Bucket = BTreeMap<RequestKey, CacheEntry>;

/// Bucket storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
        let buckets = self.buckets.read().await;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn put(&self, bucket: &str, entry: CacheEntry) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete_entry(&self, bucket: &str, key: &RequestKey) -> Result<bool> {
        let mut buckets = self.buckets.write().await;
        Ok(buckets
            .get_mut(bucket)
            .map(|b| b.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        Ok(self.buckets.read().await.keys().cloned().collect())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.write().await.remove(bucket).is_some())
    }
}
