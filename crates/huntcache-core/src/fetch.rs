//! Network transport.
//!
//! The engine never talks to the network directly; it goes through a `Fetcher`
//! supplied by the host. `ReqwestFetcher` is the stock implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use crate::error::NetworkError;
use crate::request::{Request, Response};

/// Issues a request on the network.
///
/// Any HTTP answer, whatever its status, is an `Ok`. `Err` means no answer at all.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Fetch and require HTTP-OK; a non-2xx answer counts as a network failure.
pub async fn fetch_ok(fetcher: &dyn Fetcher, request: &Request) -> Result<Response, NetworkError> {
    let response = fetcher.fetch(request).await?;
    if response.is_ok() {
        Ok(response)
    } else {
        debug!(url = %request.url, status = response.status, "Network answered non-OK");
        Err(NetworkError::from_status(response.status, &response.text()))
    }
}

/// `Fetcher` over a shared `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// Build a client. The engine imposes no timeout of its own; pass one here if the host wants it.
    pub fn new(timeout: Option<Duration>) -> Result<Self, NetworkError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &request.headers {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;

    #[tokio::test]
    async fn test_fetch_ok_rejects_non_2xx() {
        let fetcher = ScriptedFetcher::new();
        fetcher.respond("https://app.example/a", Response::ok("fine"));
        fetcher.respond("https://app.example/b", Response::new(500, "boom"));

        let a = Request::get("https://app.example/a").unwrap();
        let b = Request::get("https://app.example/b").unwrap();
        assert_eq!(fetch_ok(&fetcher, &a).await.unwrap().body, b"fine");
        assert!(matches!(
            fetch_ok(&fetcher, &b).await,
            Err(NetworkError::ServerError(body)) if body == "boom"
        ));
    }

    #[test]
    fn test_reqwest_fetcher_builds() {
        assert!(ReqwestFetcher::new(Some(Duration::from_secs(30))).is_ok());
        assert!(ReqwestFetcher::new(None).is_ok());
    }
}
