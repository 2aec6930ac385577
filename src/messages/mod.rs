//! Message model.
//!
//! One [`Message`] per platform delivery. Messages are created by the
//! ingestion layer, mutated only through the state machine and the group
//! synchronizer, and never deleted here.

pub mod state;

pub use state::{transition, ProcessingState, TransitionError, TransitionRequest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::captions::AnalyzedContent;

/// Opaque platform-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One entry in a message's edit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEntry {
    /// When the edit happened.
    pub edited_at: DateTime<Utc>,
    /// Caption text before the edit, if it had one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_caption: Option<String>,
}

/// One unit delivered by the messaging platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform-assigned identifier.
    pub id: MessageId,
    /// Chat the message arrived in.
    pub chat_id: String,
    /// Group this message belongs to; `None` for standalone messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_group_id: Option<String>,
    /// Caption text, present only on the member that physically carried it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// True only for the single group member that carried the caption.
    pub is_original_caption: bool,
    /// Structured analysis, once produced or propagated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_content: Option<AnalyzedContent>,
    /// Lifecycle stage of this message's analysis work.
    pub processing_state: ProcessingState,
    /// Last processing error, present exactly when the state is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    /// Failed attempts so far; preserved across error resets for backoff.
    pub retry_count: u32,
    /// Tracing identifier threaded through every operation on this message.
    pub correlation_id: String,
    /// When the platform delivered the message.
    pub created_at: DateTime<Utc>,
    /// Prior caption revisions, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditEntry>,
    /// Whether this message has been edited (directly or by sync).
    #[serde(default)]
    pub is_edited: bool,
}

impl Message {
    /// Create a message in the `Initialized` state.
    pub fn new(id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            id: MessageId::from_string(id),
            chat_id: chat_id.into(),
            media_group_id: None,
            caption: None,
            is_original_caption: false,
            analyzed_content: None,
            processing_state: ProcessingState::Initialized,
            processing_error: None,
            retry_count: 0,
            correlation_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            edit_history: Vec::new(),
            is_edited: false,
        }
    }

    /// Attach the caption this message carried.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self.is_original_caption = true;
        self
    }

    /// Place the message in a media group.
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.media_group_id = Some(group_id.into());
        self
    }

    /// Override the delivery timestamp.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Whether this message is part of a media group.
    pub fn in_media_group(&self) -> bool {
        self.media_group_id.as_deref().is_some_and(|g| !g.is_empty())
    }
}

/// Field-sparse update applied by [`crate::store::MessageStore::update`].
///
/// Unset fields leave the stored value untouched. `processing_error` uses a
/// nested option: `Some(None)` clears a recorded error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_content: Option<AnalyzedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_state: Option<ProcessingState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_history: Option<Vec<EditEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_edited: Option<bool>,
}

impl MessageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: AnalyzedContent) -> Self {
        self.analyzed_content = Some(content);
        self
    }

    pub fn state(mut self, state: ProcessingState) -> Self {
        self.processing_state = Some(state);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.processing_error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.processing_error = Some(None);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn edit_history(mut self, history: Vec<EditEntry>) -> Self {
        self.edit_history = Some(history);
        self
    }

    pub fn edited(mut self, edited: bool) -> Self {
        self.is_edited = Some(edited);
        self
    }

    /// Apply this update to a message in place.
    pub fn apply(&self, message: &mut Message) {
        if let Some(content) = &self.analyzed_content {
            message.analyzed_content = Some(content.clone());
        }
        if let Some(state) = self.processing_state {
            message.processing_state = state;
        }
        if let Some(error) = &self.processing_error {
            message.processing_error = error.clone();
        }
        if let Some(count) = self.retry_count {
            message.retry_count = count;
        }
        if let Some(history) = &self.edit_history {
            message.edit_history = history.clone();
        }
        if let Some(edited) = self.is_edited {
            message.is_edited = edited;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder() {
        let msg = Message::new("m1", "chat-9")
            .with_caption("Widget #AB022524 x5")
            .in_group("g1");

        assert_eq!(msg.id.as_ref(), "m1");
        assert_eq!(msg.chat_id, "chat-9");
        assert!(msg.is_original_caption);
        assert!(msg.in_media_group());
        assert_eq!(msg.processing_state, ProcessingState::Initialized);
        assert_eq!(msg.retry_count, 0);
        assert!(!msg.correlation_id.is_empty());
    }

    #[test]
    fn test_empty_group_id_means_standalone() {
        let msg = Message::new("m1", "chat-9").in_group("");
        assert!(!msg.in_media_group());
    }

    #[test]
    fn test_update_is_field_sparse() {
        let mut msg = Message::new("m1", "chat-9").with_caption("keep me");
        msg.retry_count = 2;

        MessageUpdate::new()
            .state(ProcessingState::Pending)
            .apply(&mut msg);

        assert_eq!(msg.processing_state, ProcessingState::Pending);
        assert_eq!(msg.retry_count, 2);
        assert_eq!(msg.caption.as_deref(), Some("keep me"));
    }

    #[test]
    fn test_update_clears_error() {
        let mut msg = Message::new("m1", "chat-9");
        msg.processing_error = Some("boom".to_string());

        MessageUpdate::new().clear_error().apply(&mut msg);

        assert!(msg.processing_error.is_none());
    }

    #[test]
    fn test_message_serialization_round_trip() {
        let msg = Message::new("m1", "chat-9").with_caption("hello").in_group("g1");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }
}
