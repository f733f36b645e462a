use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{CacheEntry, CacheStore};
use crate::request::{RequestKey, Response};

const ENTRY_EXT: &str = "entry";

/// Width of the big-endian metadata length that opens every entry file
const LEN_PREFIX: usize = 8;

/// Suffix counter so concurrent writers never share a temp file
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Entry metadata; the body follows it in the same file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    response: Response,
}

/// Bucket storage on the local filesystem.
///
/// Layout: `<root>/<bucket>/<sha256(key)>.entry`, each file holding
/// `[u64 BE meta length][meta JSON][body]`. An entry is published by a single
/// rename, so readers see one writer's complete entry or none at all.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty()
            || bucket == "."
            || bucket == ".."
            || bucket.contains(['/', '\\'])
        {
            bail!("Invalid bucket name: {:?}", bucket);
        }
        Ok(self.root.join(bucket))
    }

    fn entry_path(&self, bucket: &str, key: &RequestKey) -> Result<PathBuf> {
        let stem = hex::encode(Sha256::digest(key.to_string().as_bytes()));
        Ok(self.bucket_dir(bucket)?.join(format!("{}.{}", stem, ENTRY_EXT)))
    }

    fn encode(entry: CacheEntry) -> Result<Vec<u8>> {
        let mut response = entry.response;
        let body = std::mem::take(&mut response.body);
        let meta = serde_json::to_vec(&EntryMeta {
            key: entry.key,
            response,
        })?;

        let mut contents = Vec::with_capacity(LEN_PREFIX + meta.len() + body.len());
        contents.extend_from_slice(&(meta.len() as u64).to_be_bytes());
        contents.extend_from_slice(&meta);
        contents.extend_from_slice(&body);
        Ok(contents)
    }

    fn decode(path: &Path, contents: &[u8]) -> Result<CacheEntry> {
        let Some((prefix, rest)) = contents.split_first_chunk::<LEN_PREFIX>() else {
            bail!("Truncated cache entry: {}", path.display());
        };
        let meta_len = usize::try_from(u64::from_be_bytes(*prefix))
            .ok()
            .filter(|len| *len <= rest.len())
            .with_context(|| format!("Corrupt cache entry header: {}", path.display()))?;
        let (meta, body) = rest.split_at(meta_len);

        let meta: EntryMeta = serde_json::from_slice(meta)
            .with_context(|| format!("Failed to parse cache metadata: {}", path.display()))?;
        let mut response = meta.response;
        response.body = body.to_vec();
        Ok(CacheEntry::new(meta.key, response))
    }

    /// Write via a temp file + rename so readers never see a half-written file
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}-{}", std::process::id(), n));
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move cache file into place: {}", path.display()))?;
        Ok(())
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        let contents = match fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache entry: {}", path.display()))
            }
        };
        Self::decode(path, &contents).map(Some)
    }
}

#[async_trait]
impl CacheStore for FsStore {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn open(&self, bucket: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create bucket: {}", bucket))
    }

    async fn get(&self, bucket: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(bucket, key)?;
        Self::read_entry(&path).await
    }

    async fn put(&self, bucket: &str, entry: CacheEntry) -> Result<()> {
        self.open(bucket).await?;
        let path = self.entry_path(bucket, &entry.key)?;
        let key = entry.key.to_string();

        let contents = Self::encode(entry)?;
        Self::write_atomic(&path, &contents).await?;

        debug!(bucket = bucket, key = %key, "Wrote cache entry");
        Ok(())
    }

    async fn delete_entry(&self, bucket: &str, key: &RequestKey) -> Result<bool> {
        let path = self.entry_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>> {
        let dir = self.bucket_dir(bucket)?;
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list bucket: {}", bucket)),
        };

        let mut keys = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .with_context(|| format!("Failed to list bucket: {}", bucket))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some(entry) = Self::read_entry(&path).await? {
                keys.push(entry.key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn bucket_names(&self) -> Result<Vec<String>> {
        let mut read_dir = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list cache root: {}", self.root.display()))?;

        let mut names = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            if item.file_type().await?.is_dir() {
                if let Some(name) = item.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool> {
        let dir = self.bucket_dir(bucket)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete bucket: {}", bucket)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;
    use tempfile::TempDir;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse(&format!("https://app.example{}", path)).unwrap())
    }

    fn entry(path: &str, body: &str) -> CacheEntry {
        CacheEntry::new(
            key(path),
            Response::ok(body).with_header("content-type", "application/json"),
        )
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path().to_path_buf()).unwrap();

        store.put("hc-api-v1", entry("/api/v1/species", "[]")).await.unwrap();
        let loaded = store.get("hc-api-v1", &key("/api/v1/species")).await.unwrap().unwrap();

        assert_eq!(loaded, entry("/api/v1/species", "[]"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = FsStore::new(temp.path().to_path_buf()).unwrap();
            store.put("hc-pages-v1", entry("/maps", "<html>")).await.unwrap();
        }

        let store = FsStore::new(temp.path().to_path_buf()).unwrap();
        assert_eq!(store.bucket_names().await.unwrap(), vec!["hc-pages-v1"]);
        assert_eq!(store.keys("hc-pages-v1").await.unwrap(), vec![key("/maps")]);
    }

    #[tokio::test]
    async fn test_missing_is_absent() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path().to_path_buf()).unwrap();

        assert!(store.get("hc-api-v1", &key("/x")).await.unwrap().is_none());
        assert!(store.keys("hc-api-v1").await.unwrap().is_empty());
        assert!(!store.delete_bucket("hc-api-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_entry_and_bucket() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path().to_path_buf()).unwrap();
        store.put("b", entry("/a", "1")).await.unwrap();
        store.put("b", entry("/b", "2")).await.unwrap();

        assert!(store.delete_entry("b", &key("/a")).await.unwrap());
        assert!(!store.delete_entry("b", &key("/a")).await.unwrap());
        assert_eq!(store.keys("b").await.unwrap(), vec![key("/b")]);

        assert!(store.delete_bucket("b").await.unwrap());
        assert!(store.bucket_names().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_never_mix_writers() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path().to_path_buf()).unwrap();
        let tagged = |tag: &str| {
            CacheEntry::new(
                key("/api/v1/products"),
                Response::ok(tag.repeat(4096)).with_header("x-tag", tag),
            )
        };

        for _ in 0..200 {
            let (a, b) = (store.clone(), store.clone());
            let (first, second) = (tagged("a"), tagged("b"));
            let writers = [
                tokio::spawn(async move { a.put("hc-api-v1", first).await }),
                tokio::spawn(async move { b.put("hc-api-v1", second).await }),
            ];
            for writer in writers {
                writer.await.unwrap().unwrap();
            }

            let loaded = store
                .get("hc-api-v1", &key("/api/v1/products"))
                .await
                .unwrap()
                .unwrap();
            let tag = loaded.response.header("x-tag").unwrap().to_string();
            assert_eq!(loaded, tagged(&tag));
        }
        assert_eq!(store.keys("hc-api-v1").await.unwrap(), vec![key("/api/v1/products")]);
    }

    #[tokio::test]
    async fn test_truncated_entry_is_a_storage_error() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path().to_path_buf()).unwrap();
        store.put("b", entry("/a", "1")).await.unwrap();

        let path = store.entry_path("b", &key("/a")).unwrap();
        std::fs::write(&path, [0u8, 0, 0]).unwrap();
        assert!(store.get("b", &key("/a")).await.is_err());

        std::fs::write(&path, u64::MAX.to_be_bytes()).unwrap();
        assert!(store.get("b", &key("/a")).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_like_bucket_names() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path().to_path_buf()).unwrap();
        assert!(store.open("../escape").await.is_err());
    }
}
