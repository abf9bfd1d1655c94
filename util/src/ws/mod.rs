// util/src/ws/mod.rs
pub mod hub;
pub use hub::{ConnectionState, HubError, TopicHub};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard event envelope carried on push topics.
///
/// `ts` is the server-side send time and orders frames for the same topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    #[serde(rename = "type")]
    pub r#type: String,
    pub event: String,
    pub topic: String,
    pub payload: T,
    pub ts: DateTime<Utc>,
}

impl<T> EventEnvelope<T> {
    pub fn new(topic: &str, event: &str, payload: T, ts: DateTime<Utc>) -> Self {
        Self {
            r#type: "event".to_string(),
            event: event.to_string(),
            topic: topic.to_string(),
            payload,
            ts,
        }
    }
}

/// Broadcast a JSON-serialized `EventEnvelope` on `topic`, stamped now.
pub async fn emit<T: Serialize>(hub: &TopicHub, topic: &str, event: &str, payload: &T) {
    emit_at(hub, topic, event, payload, Utc::now()).await;
}

/// Broadcast a JSON-serialized `EventEnvelope` on `topic` with an explicit timestamp.
pub async fn emit_at<T: Serialize>(
    hub: &TopicHub,
    topic: &str,
    event: &str,
    payload: &T,
    ts: DateTime<Utc>,
) {
    let env = EventEnvelope::new(topic, event, payload, ts);
    match serde_json::to_string(&env) {
        Ok(json) => hub.broadcast(topic, json).await,
        Err(e) => tracing::warn!("Failed to serialize '{event}' for '{topic}': {e}"),
    }
}
