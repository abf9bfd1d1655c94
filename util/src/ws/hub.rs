//! An in-process, topic-addressed push hub with a connection lifecycle.
//!
//! Uses Tokio broadcast channels per topic. Subscriptions are reference counted per
//! topic so callers can observe how many live subscriptions a topic has, topics can be
//! refused, and the whole hub can be disconnected and reconnected.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast, watch};

/// Type alias for topic name.
type Topic = String;

/// Sender for a topic's broadcast channel.
type Sender = broadcast::Sender<String>;

/// Receiver for a topic's broadcast channel.
pub type Receiver = broadcast::Receiver<String>;

const TOPIC_CAPACITY: usize = 100;

/// Whether frames can currently flow through the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("push connection is down")]
    Disconnected,
    #[error("subscription to '{topic}' was refused: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Manages broadcast channels per topic.
///
/// - Lazily creates broadcast channels per topic on first subscription
/// - Removes topics when their receiver count drops to zero after sending
/// - Counts subscriptions per topic (one per `subscribe`, released by `unsubscribe`)
/// - Drops every channel on `disconnect`, so open receivers observe `Closed`
#[derive(Clone)]
pub struct TopicHub {
    /// Map of topics to broadcast senders.
    inner: Arc<RwLock<HashMap<Topic, Sender>>>,
    /// topic -> number of open subscriptions
    subscriptions: Arc<RwLock<HashMap<Topic, usize>>>,
    /// topic -> refusal reason
    denied: Arc<RwLock<HashMap<Topic, String>>>,
    connection: Arc<watch::Sender<ConnectionState>>,
}

impl Default for TopicHub {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            subscriptions: Arc::default(),
            denied: Arc::default(),
            connection: Arc::new(watch::Sender::new(ConnectionState::Connected)),
        }
    }
}

impl TopicHub {
    /// Creates a new, connected, empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the given topic, creating it if necessary.
    pub async fn subscribe(&self, topic: &str) -> Result<Receiver, HubError> {
        if !self.is_connected() {
            return Err(HubError::Disconnected);
        }
        if let Some(reason) = self.denied.read().await.get(topic) {
            return Err(HubError::Rejected {
                topic: topic.to_string(),
                reason: reason.clone(),
            });
        }

        let rx = {
            let mut map = self.inner.write().await;
            map.entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
                .subscribe()
        };
        *self
            .subscriptions
            .write()
            .await
            .entry(topic.to_string())
            .or_insert(0) += 1;
        Ok(rx)
    }

    /// Releases one subscription on `topic`. Unknown topics are ignored.
    pub async fn unsubscribe(&self, topic: &str) {
        let mut subs = self.subscriptions.write().await;
        if let Some(cnt) = subs.get_mut(topic) {
            if *cnt > 1 {
                *cnt -= 1;
            } else {
                subs.remove(topic);
            }
        }
    }

    /// Broadcasts a message to all subscribers of `topic`.
    ///
    /// If the topic does not exist or the hub is disconnected, it's a no-op.
    /// If the topic has zero receivers after sending, it is removed.
    pub async fn broadcast<T: Into<String>>(&self, topic: &str, msg: T) {
        if !self.is_connected() {
            tracing::debug!("Dropping frame for '{topic}' while disconnected");
            return;
        }
        let mut map = self.inner.write().await;
        if let Some(sender) = map.get(topic) {
            let _ = sender.send(msg.into());
            if sender.receiver_count() == 0 {
                tracing::debug!("Removing topic '{topic}' due to no receivers.");
                map.remove(topic);
            }
        }
    }

    /// Number of open subscriptions on `topic`.
    pub async fn subscription_count(&self, topic: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Refuse future subscriptions to `topic`.
    pub async fn deny(&self, topic: &str, reason: impl Into<String>) {
        self.denied
            .write()
            .await
            .insert(topic.to_string(), reason.into());
    }

    // -------------------- Connection lifecycle --------------------

    /// Watch the connection state.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connection.borrow() == ConnectionState::Connected
    }

    /// Drops every topic channel and forgets all subscriptions.
    pub async fn disconnect(&self) {
        self.connection.send_replace(ConnectionState::Disconnected);
        self.inner.write().await.clear();
        self.subscriptions.write().await.clear();
        tracing::info!("Push hub disconnected");
    }

    pub async fn reconnect(&self) {
        self.connection.send_replace(ConnectionState::Connected);
        tracing::info!("Push hub reconnected");
    }
}
