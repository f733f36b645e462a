use thiserror::Error;

/// Result type alias for cache engine operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// A failed network leg: the fetch threw, or the origin answered with a non-OK status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

impl NetworkError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status {
            401 => NetworkError::Unauthorized,
            404 => NetworkError::NotFound(truncated),
            429 => NetworkError::RateLimited,
            500..=599 => NetworkError::ServerError(truncated),
            _ => NetworkError::Status {
                status,
                body: truncated,
            },
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Transport(err.to_string())
    }
}

/// All errors the engine surfaces to its host.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network failure: {0}")]
    Network(#[from] NetworkError),

    /// Bucket I/O failed. Never recovered; fails the enclosing operation.
    #[error("Storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("Not found in cache: {url}")]
    NotFoundInCache { url: String },

    #[error("Install aborted: precache fetch of {url} failed: {source}")]
    InstallAborted {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl CacheError {
    /// True for the one recoverable class: the network leg failed.
    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(NetworkError::from_status(401, ""), NetworkError::Unauthorized);
        assert_eq!(NetworkError::from_status(429, ""), NetworkError::RateLimited);
        assert!(matches!(NetworkError::from_status(404, "gone"), NetworkError::NotFound(b) if b == "gone"));
        assert!(matches!(NetworkError::from_status(503, ""), NetworkError::ServerError(_)));
        assert!(matches!(
            NetworkError::from_status(302, ""),
            NetworkError::Status { status: 302, .. }
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match NetworkError::from_status(500, &body) {
            NetworkError::ServerError(msg) => {
                assert!(msg.len() < 600);
                assert!(msg.contains("2000 total bytes"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_is_network() {
        assert!(CacheError::from(NetworkError::RateLimited).is_network());
        assert!(!CacheError::NotFoundInCache { url: "/".into() }.is_network());
    }
}
