//! Typed crate configuration.
//!
//! Everything a host needs to tune is resolved here once, at load time,
//! instead of being merged ad hoc per call.

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::retry::RetryPolicy;

/// Root configuration for the intake core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Retry behavior applied to store and platform writes.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Subscriber settings for hosts that want this crate to set up logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IngestConfig {
    /// Parse a configuration from JSON, filling unspecified fields with
    /// their documented defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
