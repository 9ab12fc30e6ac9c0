//! Publish/subscribe primitive
//!
//! The directory channel and move requests ride on a topic-based pub/sub
//! supplied by the collaborator. `persist` publishes are retained per topic
//! and replayed to anyone subscribing later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::BackendError;

/// Options for a single publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    /// Retain as the topic's latest payload for late subscribers
    pub persist: bool,
}

impl PublishOptions {
    pub fn persist() -> Self {
        Self { persist: true }
    }
}

/// Topic-based publish/subscribe
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        options: PublishOptions,
    ) -> Result<(), BackendError>;

    /// Subscribe to a topic. The retained payload, if any, is delivered first.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, BackendError>;
}

#[derive(Default)]
struct Topic {
    retained: Option<String>,
    subscribers: Vec<mpsc::UnboundedSender<String>>,
}

/// In-process pub/sub shared by every client in one process
#[derive(Clone, Default)]
pub struct LocalPubSub {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest retained payload for a topic
    pub fn retained(&self, topic: &str) -> Option<String> {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).and_then(|t| t.retained.clone())
    }
}

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        options: PublishOptions,
    ) -> Result<(), BackendError> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let entry = topics.entry(topic.to_string()).or_default();
        if options.persist {
            entry.retained = Some(payload.clone());
        }

        entry.subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        debug!(topic = topic, subscribers = entry.subscribers.len(), "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let entry = topics.entry(topic.to_string()).or_default();
        if let Some(retained) = &entry.retained {
            let _ = tx.send(retained.clone());
        }
        entry.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_late_subscriber_gets_persisted_payload() {
        let pubsub = LocalPubSub::new();
        pubsub
            .publish("ROOM_LIST", "one".into(), PublishOptions::persist())
            .await
            .unwrap();
        pubsub
            .publish("ROOM_LIST", "two".into(), PublishOptions::persist())
            .await
            .unwrap();

        let mut rx = pubsub.subscribe("ROOM_LIST").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transient_publish_not_retained() {
        let pubsub = LocalPubSub::new();
        let mut early = pubsub.subscribe("ROOM_MOVE").await.unwrap();
        pubsub
            .publish("ROOM_MOVE", "go".into(), PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(early.recv().await.unwrap(), "go");
        assert!(pubsub.retained("ROOM_MOVE").is_none());
        let mut late = pubsub.subscribe("ROOM_MOVE").await.unwrap();
        assert!(late.try_recv().is_err());
    }
}
