//! Processing lifecycle state machine.
//!
//! Guards every state change a message's analysis can go through. Illegal
//! requests are rejected with an error and leave the message untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::Message;

/// Lifecycle stage of a message's content analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// Just ingested; nothing known about its caption yet.
    #[default]
    Initialized,
    /// A caption is available and waiting to be analyzed.
    Pending,
    /// A worker has claimed the message.
    Processing,
    /// Analysis succeeded and content was durably written.
    Completed,
    /// Analysis or persistence failed; the error is recorded.
    Error,
    /// The message will never be analyzed (no caption, no group).
    NoCaption,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::NoCaption => "no_caption",
        }
    }

    /// Whether the state ends the normal lifecycle. `Error` is not terminal:
    /// a reset can send the message back to `Pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::NoCaption)
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProcessingState {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "no_caption" => Ok(Self::NoCaption),
            other => Err(TransitionError::UnknownState(other.to_string())),
        }
    }
}

/// A requested state change, with everything the guards need to check it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// State to move to.
    pub target: ProcessingState,
    /// Required when targeting `Error`: what went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Bypass the guards and claim the message for reprocessing from any
    /// state, including `Completed`.
    #[serde(default)]
    pub force: bool,
}

impl TransitionRequest {
    /// Request a normal transition to `target`.
    pub fn to(target: ProcessingState) -> Self {
        Self {
            target,
            error_message: None,
            force: false,
        }
    }

    /// Request the `Processing -> Error` transition, recording the failure.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            target: ProcessingState::Error,
            error_message: Some(error.into()),
            force: false,
        }
    }

    /// Request reprocessing regardless of the current state.
    pub fn force_reprocess() -> Self {
        Self {
            target: ProcessingState::Processing,
            error_message: None,
            force: true,
        }
    }
}

/// Why a transition request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from} to {to}")]
    Illegal {
        from: ProcessingState,
        to: ProcessingState,
    },
    #[error("cannot complete without analyzed content")]
    MissingContent,
    #[error("cannot enter error state without an error message")]
    MissingError,
    #[error("unknown processing state: {0}")]
    UnknownState(String),
}

/// Apply a state change to a message, enforcing the lifecycle guards.
///
/// On success the message's state (and, for failures and resets, its error
/// and retry bookkeeping) is updated in place. On rejection the message is
/// left exactly as it was.
pub fn transition(message: &mut Message, request: &TransitionRequest) -> Result<(), TransitionError> {
    use ProcessingState::*;

    let from = message.processing_state;
    let to = request.target;

    if request.force && to == Processing {
        debug!(
            message_id = %message.id,
            correlation_id = %message.correlation_id,
            %from,
            "forced reprocess"
        );
        message.processing_state = Processing;
        return Ok(());
    }

    match (from, to) {
        (Initialized, Pending) | (Initialized, NoCaption) | (Pending, Processing) => {
            message.processing_state = to;
        }
        (Processing, Completed) => {
            if message.analyzed_content.is_none() {
                return Err(TransitionError::MissingContent);
            }
            message.processing_state = Completed;
            message.processing_error = None;
        }
        (Processing, Error) => {
            let error = request
                .error_message
                .clone()
                .ok_or(TransitionError::MissingError)?;
            message.processing_error = Some(error);
            message.retry_count += 1;
            message.processing_state = Error;
        }
        (Error, Pending) => {
            // Explicit reset: clear the error, keep retry_count so callers
            // can make backoff-aware reattempt decisions.
            message.processing_error = None;
            message.processing_state = Pending;
        }
        _ => return Err(TransitionError::Illegal { from, to }),
    }

    debug!(
        message_id = %message.id,
        correlation_id = %message.correlation_id,
        %from,
        %to,
        "state transition"
    );
    Ok(())
}
