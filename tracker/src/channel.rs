//! The push transport seen from the tracker.

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use util::ws::{ConnectionState, TopicHub};

use crate::error::ChannelError;

/// Topic-addressed push transport.
///
/// Each successful `subscribe` must be paired with one `unsubscribe` of the same topic.
/// Receivers observe `Closed` when the connection drops; subscribers then wait for
/// [`ConnectionState::Connected`] and subscribe again.
#[async_trait]
pub trait MessageChannel: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str)
    -> Result<broadcast::Receiver<String>, ChannelError>;

    async fn unsubscribe(&self, topic: &str);

    fn connection(&self) -> watch::Receiver<ConnectionState>;
}

#[async_trait]
impl MessageChannel for TopicHub {
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<broadcast::Receiver<String>, ChannelError> {
        TopicHub::subscribe(self, topic).await.map_err(Into::into)
    }

    async fn unsubscribe(&self, topic: &str) {
        TopicHub::unsubscribe(self, topic).await
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        TopicHub::connection(self)
    }
}

/// Resolves once the connection is up; `false` when the channel is gone for good.
pub async fn wait_connected(connection: &mut watch::Receiver<ConnectionState>) -> bool {
    connection
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .is_ok()
}
