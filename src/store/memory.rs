//! In-memory store and audit sink.
//!
//! The default in-process backing for the core and the substitute the test
//! suites run against.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{AuditEvent, AuditSink, MessageStore, StoreError};
use crate::error::OperationError;
use crate::messages::{Message, MessageId, MessageUpdate};

/// Thread-safe map-backed message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<String, Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a message.
    pub fn insert(&self, message: Message) {
        self.messages
            .write()
            .insert(message.id.as_ref().to_string(), message);
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.messages
            .read()
            .get(id.as_ref())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_by_group(&self, group_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .messages
            .read()
            .values()
            .filter(|m| m.media_group_id.as_deref() == Some(group_id))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &MessageId, update: MessageUpdate) -> Result<(), StoreError> {
        let mut messages = self.messages.write();
        let message = messages
            .get_mut(id.as_ref())
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        update.apply(message);
        Ok(())
    }
}

/// Audit sink that retains every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), OperationError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ProcessingState;

    #[tokio::test]
    async fn test_get_and_not_found() {
        let store = MemoryStore::new();
        store.insert(Message::new("m1", "chat-1"));

        let found = store.get(&MessageId::from_string("m1")).await.unwrap();
        assert_eq!(found.id.as_ref(), "m1");

        let missing = store.get(&MessageId::from_string("nope")).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_group_filters() {
        let store = MemoryStore::new();
        store.insert(Message::new("a", "chat-1").in_group("g1"));
        store.insert(Message::new("b", "chat-1").in_group("g1"));
        store.insert(Message::new("c", "chat-1").in_group("g2"));
        store.insert(Message::new("d", "chat-1"));

        let members = store.list_by_group("g1").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.media_group_id.as_deref() == Some("g1")));
    }

    #[tokio::test]
    async fn test_update_applies_sparse_fields() {
        let store = MemoryStore::new();
        store.insert(Message::new("m1", "chat-1").with_caption("keep"));

        let id = MessageId::from_string("m1");
        store
            .update(&id, MessageUpdate::new().state(ProcessingState::Pending))
            .await
            .unwrap();

        let msg = store.get(&id).await.unwrap();
        assert_eq!(msg.processing_state, ProcessingState::Pending);
        assert_eq!(msg.caption.as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn test_update_unknown_message_fails() {
        let store = MemoryStore::new();
        let result = store
            .update(&MessageId::from_string("ghost"), MessageUpdate::new())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recording_sink_retains_events() {
        let sink = RecordingAuditSink::new();
        sink.record(AuditEvent {
            event_type: super::super::AuditEventType::SyncStarted,
            entity_id: "g1".to_string(),
            correlation_id: "c1".to_string(),
            metadata: serde_json::Value::Null,
            error_message: None,
        })
        .await
        .unwrap();

        assert_eq!(sink.events().len(), 1);
    }
}
