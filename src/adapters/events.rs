//! Event publishers
//!
//! Cart events go to NATS when a server is configured, otherwise they are only
//! logged. `InMemoryEventPublisher` records them for tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::events::CartEvent;
use crate::ports::{EventPublisher, PublishError};

/// Publishes each event as JSON on `<prefix>.<event name>`.
#[derive(Clone)]
pub struct NatsEventPublisher {
    client: async_nats::Client,
    prefix: String,
}

impl NatsEventPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client, prefix: "cart".to_string() }
    }

    fn subject(&self, event: &CartEvent) -> String {
        format!("{}.{}", self.prefix, event.name())
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &CartEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event).map_err(|e| PublishError(e.to_string()))?;
        self.client
            .publish(self.subject(event), payload.into())
            .await
            .map_err(|e| PublishError(e.to_string()))
    }
}

/// Publisher used when no broker is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: &CartEvent) -> Result<(), PublishError> {
        tracing::debug!(event = event.name(), user_id = %event.user_id(), "Cart event");
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<CartEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<CartEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &CartEvent) -> Result<(), PublishError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::UserId;
    use uuid::Uuid;

    #[tokio::test]
    async fn recording_publisher_keeps_order() {
        let publisher = InMemoryEventPublisher::new();
        let user_id = UserId::new("U1").unwrap();
        let cart_id = Uuid::now_v7();
        publisher.publish(&CartEvent::Cleared { cart_id, user_id: user_id.clone() }).await.unwrap();
        LoggingEventPublisher.publish(&CartEvent::Cleared { cart_id, user_id }).await.unwrap();
        let events = publisher.published().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "cleared");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = CartEvent::Cleared { cart_id: Uuid::nil(), user_id: UserId::new("U1").unwrap() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cleared");
        assert_eq!(json["user_id"], "U1");
    }
}
