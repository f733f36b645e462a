//! Engine configuration.
//!
//! Route tables, bucket TTLs, the precache manifest and the prefetch list are
//! data, not code. They are loaded from a JSON file (camelCase keys) or taken
//! from `EngineConfig::default()`, which carries the hunting app's tables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::{BucketKind, BucketSettings};

/// Application name used for the default storage directory
const APP_NAME: &str = "huntcache";

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    pub ttl_secs: u64,
    /// Trim the oldest entries beyond this count after each write. Unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

impl BucketConfig {
    fn ttl(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BucketsConfig {
    pub r#static: BucketConfig,
    pub images: BucketConfig,
    pub api: BucketConfig,
    pub fonts: BucketConfig,
    pub pages: BucketConfig,
}

impl BucketsConfig {
    pub fn get(&self, kind: BucketKind) -> BucketConfig {
        match kind {
            BucketKind::Static => self.r#static,
            BucketKind::Images => self.images,
            BucketKind::Api => self.api,
            BucketKind::Fonts => self.fonts,
            BucketKind::Pages => self.pages,
        }
    }

    pub fn settings(&self, kind: BucketKind) -> BucketSettings {
        let config = self.get(kind);
        BucketSettings {
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries,
        }
    }
}

impl Default for BucketsConfig {
    fn default() -> Self {
        Self {
            r#static: BucketConfig::ttl(7 * DAY),
            images: BucketConfig::ttl(30 * DAY),
            api: BucketConfig::ttl(5 * MINUTE),
            fonts: BucketConfig::ttl(365 * DAY),
            pages: BucketConfig::ttl(DAY),
        }
    }
}

/// Ordered classification tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutesConfig {
    /// Path prefix that marks the API family
    pub api_prefix: String,
    /// API prefixes served cache-first (checked first)
    pub api_cache_first: Vec<String>,
    /// API prefixes served stale-while-revalidate (checked second)
    pub api_stale_while_revalidate: Vec<String>,
    pub image_extensions: Vec<String>,
    pub font_extensions: Vec<String>,
    pub font_hosts: Vec<String>,
    pub static_extensions: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            api_cache_first: strings(&["/api/v1/species", "/api/v1/regulations", "/api/v1/seasons"]),
            api_stale_while_revalidate: strings(&[
                "/api/v1/products",
                "/api/v1/tutorials",
                "/api/v1/map-layers",
            ]),
            image_extensions: strings(&["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"]),
            font_extensions: strings(&["woff", "woff2", "ttf", "otf", "eot"]),
            font_hosts: strings(&["fonts.googleapis.com", "fonts.gstatic.com"]),
            static_extensions: strings(&["js", "css", "json"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub app_prefix: String,
    /// Version tag embedded in every bucket name
    pub version: String,
    /// Base URL that relative manifest entries resolve against
    pub origin: String,
    pub buckets: BucketsConfig,
    pub routes: RoutesConfig,
    /// Fetched and stored all-or-nothing at install
    pub precache: Vec<String>,
    /// Fetched best-effort into the pages bucket after activation
    pub prefetch: Vec<String>,
    /// App shell served to navigations when nothing better is cached
    pub shell_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_prefix: "huntcache".to_string(),
            version: "v1".to_string(),
            origin: "http://localhost/".to_string(),
            buckets: BucketsConfig::default(),
            routes: RoutesConfig::default(),
            precache: strings(&["/", "/index.html", "/manifest.json", "/favicon.ico"]),
            prefetch: strings(&["/shop", "/maps", "/tutorials", "/referral"]),
            shell_url: "/index.html".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse engine config: {}", path.display()))
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Where a durable store lives when the host does not choose
    pub fn default_storage_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_ttls() {
        let buckets = BucketsConfig::default();
        assert_eq!(buckets.settings(BucketKind::Api).ttl, Duration::from_secs(300));
        assert_eq!(buckets.get(BucketKind::Fonts).ttl_secs, 365 * DAY);
        assert!(BucketKind::ALL.iter().all(|k| buckets.get(*k).max_entries.is_none()));
    }

    #[test]
    fn test_missing_file_gives_default() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(&temp.path().join("none.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("engine.json");

        let mut config = EngineConfig::default();
        config.version = "v7".to_string();
        config.buckets.images.max_entries = Some(60);
        config.save(&path).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_default_storage_dir() {
        if let Ok(dir) = EngineConfig::default_storage_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"appPrefix": "hunt", "version": "2024-10", "precache": ["/"]}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.app_prefix, "hunt");
        assert_eq!(config.precache, vec!["/"]);
        assert_eq!(config.routes, RoutesConfig::default());
    }
}
