//! Control channel message types.
//!
//! The host application drives the engine out-of-band with an envelope of the
//! form `{ "type": "...", "payload": { ... } }`. Replies go back through a
//! caller-supplied port as `{ "success": bool }` or a stats object keyed by
//! logical bucket name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Where a reply is delivered. Adapters pass the first port of the message, if any.
pub type ReplyPort = oneshot::Sender<ControlReply>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting version now
    SkipWaiting,
    /// Delete every bucket of this application, all versions
    ClearCache,
    /// Fetch a URL into the pages bucket
    CacheRoute { url: String },
    GetCacheStats,
}

impl ControlMessage {
    /// Lenient parse of a raw envelope. Unknown types and malformed payloads
    /// yield `None`; they are to be ignored, not treated as errors.
    pub fn from_json(envelope: &Value) -> Option<Self> {
        let kind = envelope.get("type")?.as_str()?;
        match kind {
            "SKIP_WAITING" => Some(Self::SkipWaiting),
            "CLEAR_CACHE" => Some(Self::ClearCache),
            "GET_CACHE_STATS" => Some(Self::GetCacheStats),
            "CACHE_ROUTE" => {
                let url = envelope
                    .get("payload")
                    .and_then(|p| p.get("url"))
                    .or_else(|| envelope.get("url"))
                    .and_then(Value::as_str);
                match url {
                    Some(url) => Some(Self::CacheRoute {
                        url: url.to_string(),
                    }),
                    None => {
                        debug!("CACHE_ROUTE without a url, ignoring");
                        None
                    }
                }
            }
            other => {
                debug!(message_type = other, "Ignoring unknown control message");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    pub count: usize,
    /// Physical bucket name
    pub cache_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Ack { success: bool },
    Stats(BTreeMap<String, BucketStats>),
}

/// Deliver a reply if anyone is listening. A dropped receiver is not an error.
pub(crate) fn send_reply(reply: Option<ReplyPort>, message: ControlReply) {
    if let Some(port) = reply {
        if port.send(message).is_err() {
            debug!("Control reply receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "SKIP_WAITING"})),
            Some(ControlMessage::SkipWaiting)
        );
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "CLEAR_CACHE", "payload": {}})),
            Some(ControlMessage::ClearCache)
        );
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "CACHE_ROUTE", "payload": {"url": "/maps"}})),
            Some(ControlMessage::CacheRoute { url: "/maps".into() })
        );
        assert_eq!(
            ControlMessage::from_json(&json!({"type": "CACHE_ROUTE", "url": "/shop"})),
            Some(ControlMessage::CacheRoute { url: "/shop".into() })
        );
    }

    #[test]
    fn test_unknown_and_malformed_are_ignored() {
        assert_eq!(ControlMessage::from_json(&json!({"type": "PUSH"})), None);
        assert_eq!(ControlMessage::from_json(&json!({"type": 7})), None);
        assert_eq!(ControlMessage::from_json(&json!({"type": "CACHE_ROUTE"})), None);
        assert_eq!(ControlMessage::from_json(&json!("CLEAR_CACHE")), None);
    }

    #[test]
    fn test_envelope_serialization() {
        let msg = ControlMessage::CacheRoute { url: "/maps".into() };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "CACHE_ROUTE", "payload": {"url": "/maps"}})
        );
        assert_eq!(
            serde_json::to_value(ControlMessage::GetCacheStats).unwrap(),
            json!({"type": "GET_CACHE_STATS"})
        );
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(
            serde_json::to_value(ControlReply::Ack { success: true }).unwrap(),
            json!({"success": true})
        );

        let mut stats = BTreeMap::new();
        stats.insert(
            "api".to_string(),
            BucketStats {
                count: 3,
                cache_name: "huntcache-api-v1".into(),
            },
        );
        assert_eq!(
            serde_json::to_value(ControlReply::Stats(stats)).unwrap(),
            json!({"api": {"count": 3, "cacheName": "huntcache-api-v1"}})
        );
    }
}
