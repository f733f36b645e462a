//! Freshness stamping and TTL evaluation.
//!
//! Every response the engine stores carries a synthetic `sw-cache-timestamp`
//! header holding the capture time in epoch milliseconds. The stamp is written
//! by the engine itself; whatever the origin sent is never trusted. An entry
//! without a readable stamp is always expired.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::request::Response;

/// Synthetic header carrying the capture time
pub const TIMESTAMP_HEADER: &str = "sw-cache-timestamp";

/// Source of "now" for stamping and expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Handy for hosts testing their wiring.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(i64::try_from(by.as_millis()).unwrap_or(i64::MAX), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Stamp a freshly fetched response with the capture time, replacing any stamp it carried
pub fn stamp(mut response: Response, now: DateTime<Utc>) -> Response {
    response
        .headers
        .insert(TIMESTAMP_HEADER.to_string(), now.timestamp_millis().to_string());
    response
}

/// Capture time of a stored response, if it carries a readable stamp
pub fn captured_at(response: &Response) -> Option<DateTime<Utc>> {
    response
        .header(TIMESTAMP_HEADER)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

/// Age in milliseconds, or `None` for an unstamped response
pub fn age_millis(response: &Response, now: DateTime<Utc>) -> Option<i64> {
    captured_at(response).map(|at| (now - at).num_milliseconds())
}

/// `(now - capturedAt) > ttl`; unstamped entries are always expired.
pub fn is_expired(response: &Response, ttl: Duration, now: DateTime<Utc>) -> bool {
    match age_millis(response, now) {
        Some(age) => i128::from(age) > ttl.as_millis() as i128,
        None => true,
    }
}
