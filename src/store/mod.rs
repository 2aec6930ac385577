//! Collaborator seams: message persistence and audit logging.
//!
//! Components receive these interfaces at construction instead of reaching
//! for a global client, so every one of them can run against the in-memory
//! implementations in [`memory`] under test.

pub mod memory;

pub use memory::{MemoryStore, RecordingAuditSink};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::OperationError;
use crate::messages::{Message, MessageId, MessageUpdate};

/// Errors surfaced by a message store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("message not found: {0}")]
    NotFound(MessageId),
    #[error(transparent)]
    Backend(#[from] OperationError),
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OperationError::application(format!("message not found: {id}")),
            StoreError::Backend(inner) => inner,
        }
    }
}

/// Externally-owned message persistence.
///
/// Consistency is read-current-state, write-new-state; the store does no
/// client-side locking.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch one message by id.
    async fn get(&self, id: &MessageId) -> Result<Message, StoreError>;

    /// Fetch every message sharing a media group id, in no particular order.
    async fn list_by_group(&self, group_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Apply a field-sparse update to one message.
    async fn update(&self, id: &MessageId, update: MessageUpdate) -> Result<(), StoreError>;
}

/// What happened, for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    SiblingWriteFailed,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    /// Message or group the event is about.
    pub entity_id: String,
    /// Tracing identifier of the triggering operation.
    pub correlation_id: String,
    /// Free-form structured context.
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Fire-and-forget audit log.
///
/// Callers must never let a sink failure abort the surrounding operation.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), OperationError>;
}

/// Sink that emits audit records as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), OperationError> {
        info!(
            event_type = ?event.event_type,
            entity_id = %event.entity_id,
            correlation_id = %event.correlation_id,
            metadata = %event.metadata,
            error = event.error_message.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}
