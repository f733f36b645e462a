//! Route classification: request -> (bucket, strategy).
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. non-GET or non-http(s) requests are rejected
//! 2. `/api/` paths: cache-first list, then stale-while-revalidate list, else network-first
//! 3. images (extension, then declared type) -> cache-first
//! 4. fonts (extension, font host, then declared type) -> cache-first
//! 5. `.js` / `.css` / `.json` -> stale-while-revalidate
//! 6. everything else is a page -> network-first with offline fallback

use reqwest::Method;

use crate::config::RoutesConfig;
use crate::registry::BucketKind;
use crate::request::{Destination, Request};
use crate::strategy::StrategyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub bucket: BucketKind,
    pub strategy: StrategyKind,
}

impl Route {
    const fn new(bucket: BucketKind, strategy: StrategyKind) -> Self {
        Self { bucket, strategy }
    }
}

#[derive(Debug, Clone)]
pub struct RouteClassifier {
    routes: RoutesConfig,
}

impl RouteClassifier {
    pub fn new(routes: RoutesConfig) -> Self {
        Self { routes }
    }

    /// Returns `None` when the request must not be routed to the engine at all.
    pub fn classify(&self, request: &Request) -> Option<Route> {
        if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
            return None;
        }

        let path = request.url.path();
        if path.starts_with(&self.routes.api_prefix) {
            return Some(self.classify_api(path));
        }

        let ext = extension(path);
        if self.is_image(request, ext.as_deref()) {
            return Some(Route::new(BucketKind::Images, StrategyKind::CacheFirst));
        }
        if self.is_font(request, ext.as_deref()) {
            return Some(Route::new(BucketKind::Fonts, StrategyKind::CacheFirst));
        }
        if matches_any(&self.routes.static_extensions, ext.as_deref()) {
            return Some(Route::new(BucketKind::Static, StrategyKind::StaleWhileRevalidate));
        }

        Some(Route::new(
            BucketKind::Pages,
            StrategyKind::NetworkFirstWithOfflineFallback,
        ))
    }

    fn classify_api(&self, path: &str) -> Route {
        let strategy = if has_prefix(&self.routes.api_cache_first, path) {
            StrategyKind::CacheFirst
        } else if has_prefix(&self.routes.api_stale_while_revalidate, path) {
            StrategyKind::StaleWhileRevalidate
        } else {
            StrategyKind::NetworkFirst
        };
        Route::new(BucketKind::Api, strategy)
    }

    fn is_image(&self, request: &Request, ext: Option<&str>) -> bool {
        if matches_any(&self.routes.image_extensions, ext) {
            return true;
        }
        request.destination == Destination::Image || declared_type_starts_with(request, &["image/"])
    }

    fn is_font(&self, request: &Request, ext: Option<&str>) -> bool {
        if matches_any(&self.routes.font_extensions, ext) {
            return true;
        }
        if let Some(host) = request.url.host_str() {
            if self.routes.font_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
                return true;
            }
        }
        request.destination == Destination::Font
            || declared_type_starts_with(request, &["font/", "application/font", "application/x-font"])
    }
}

fn has_prefix(prefixes: &[String], path: &str) -> bool {
    prefixes.iter().any(|p| path.starts_with(p.as_str()))
}

fn matches_any(extensions: &[String], ext: Option<&str>) -> bool {
    ext.is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Lowercased extension of the last path segment
fn extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Only the preferred (first) type of the Accept header counts. Navigations
/// list image types further down and must not be mistaken for images.
fn declared_type_starts_with(request: &Request, prefixes: &[&str]) -> bool {
    let Some(accept) = request.accept() else {
        return false;
    };
    let preferred = accept.split(',').next().unwrap_or("").trim().to_ascii_lowercase();
    prefixes.iter().any(|p| preferred.starts_with(p))
}
