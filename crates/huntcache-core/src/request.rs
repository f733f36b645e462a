//! Request, response and cache key types shared by every layer of the engine.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// What the host says the request is for (the service worker `destination`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Fetch,
    #[default]
    Unknown,
}

/// An intercepted request, as handed over by the hosting transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// Header names are stored lowercase.
    pub headers: BTreeMap<String, String>,
    pub destination: Destination,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            destination: Destination::Unknown,
        }
    }

    /// Parse an absolute URL into a GET request
    pub fn get(url: &str) -> CacheResult<Self> {
        Ok(Self::new(Method::GET, parse_url(url)?))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The declared content type the caller accepts, if any
    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    /// Navigation requests are the ones that load a whole page.
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }
}

/// Parse an absolute URL, mapping parse failures into the engine's error type
pub fn parse_url(url: &str) -> CacheResult<Url> {
    Url::parse(url).map_err(|e| CacheError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// A response as stored in and served from a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    /// The synthetic answer for a navigation that exhausted every fallback.
    pub fn offline() -> Self {
        Self::new(503, "Offline").with_header("content-type", "text/plain")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// HTTP-OK in the fetch sense: any 2xx status
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Normalized identity of a cacheable request.
///
/// Only GET requests ever produce a key, so nothing else can reach a bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Key for a request, or `None` when the method is not cacheable
    pub fn for_request(request: &Request) -> Option<Self> {
        if request.method != Method::GET {
            return None;
        }
        Some(Self::get(&request.url))
    }

    /// Key for a GET of `url`. Fragments never reach the network, so they are dropped.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET.to_string(),
            url: url.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
