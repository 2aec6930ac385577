//! Failure kinds and the operation error carried through the retry layer.
//!
//! Every fallible collaborator call constructs an [`OperationError`] with its
//! kind attached at the point of failure. The substring classifier exists only
//! for error text that arrives from outside without a tag; it is advisory and
//! never replaces the original message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Best-effort category of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, DNS failure, broken pipe and friends.
    Network,
    /// A per-attempt deadline elapsed before the operation finished.
    Timeout,
    /// The message store rejected or failed the call.
    Database,
    /// The caller is not allowed to perform the operation.
    Permission,
    /// Anything that is not recognizably one of the above.
    Application,
}

impl FailureKind {
    /// Classify foreign error text by recognizable substrings.
    ///
    /// Advisory only: used when an error crosses into this crate without a
    /// kind already attached. Defaults to [`FailureKind::Application`].
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
            Self::Timeout
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("unreachable")
            || lower.contains("dns")
        {
            Self::Network
        } else if lower.contains("database")
            || lower.contains("sql")
            || lower.contains("constraint")
            || lower.contains("locked")
        {
            Self::Database
        } else if lower.contains("permission")
            || lower.contains("forbidden")
            || lower.contains("unauthorized")
            || lower.contains("denied")
        {
            Self::Permission
        } else {
            Self::Application
        }
    }

    /// Whether a failure of this kind is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Database)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Database => "database",
            Self::Permission => "permission",
            Self::Application => "application",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed operation with its kind attached at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    /// Category assigned where the failure happened.
    pub kind: FailureKind,
    /// Human-readable description, forwarded untouched.
    pub message: String,
}

impl OperationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Database, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permission, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Application, message)
    }

    /// Wrap untagged error text, inferring the kind from its content.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }
}
