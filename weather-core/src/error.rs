//! Error type shared by sources, the orchestrator and the merged aggregate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Feature;

/// Errors produced while resolving, requesting or merging weather data.
///
/// Values are `Clone` because one failure is recorded in the aggregate's failure
/// map and may be handed to several coalesced callers.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeatherError {
    /// A source without credentials was asked to do work.
    /// Dispatch only goes through configured sources, so this is a wiring bug.
    #[error("No API key configured for source '{source_id}'")]
    ApiKeyMissing { source_id: String },

    /// The source could not map the coordinates to its own location identifiers.
    #[error("Source '{source_id}' could not resolve the location: {reason}")]
    InvalidLocation { source_id: String, reason: String },

    /// The source answered with a payload that could not be used.
    #[error("Source '{source_id}' returned invalid or incomplete data: {reason}")]
    InvalidOrIncompleteData { source_id: String, reason: String },

    #[error("Network error from source '{source_id}': {reason}")]
    Network { source_id: String, reason: String },

    #[error("Source '{source_id}' timed out")]
    Timeout { source_id: String },

    #[error("Source '{source_id}' does not support {feature} for this location")]
    UnsupportedFeatureForSource { source_id: String, feature: Feature },

    #[error("Unknown source '{source_id}'")]
    SourceNotFound { source_id: String },

    #[error("Request was cancelled")]
    Cancelled,
}

impl WeatherError {
    /// Map a transport error. The URL is stripped since it may carry an API key.
    pub fn network(source_id: &str, err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout { source_id: source_id.to_string() }
        } else {
            Self::Network { source_id: source_id.to_string(), reason: err.to_string() }
        }
    }

    pub fn incomplete(source_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOrIncompleteData { source_id: source_id.to_string(), reason: reason.into() }
    }

    pub fn invalid_location(source_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidLocation { source_id: source_id.to_string(), reason: reason.into() }
    }

    /// Whether the caller may reasonably try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. } | Self::Cancelled)
    }

    /// The source the error originated from, if any.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::ApiKeyMissing { source_id }
            | Self::InvalidLocation { source_id, .. }
            | Self::InvalidOrIncompleteData { source_id, .. }
            | Self::Network { source_id, .. }
            | Self::Timeout { source_id }
            | Self::UnsupportedFeatureForSource { source_id, .. }
            | Self::SourceNotFound { source_id } => Some(source_id),
            Self::Cancelled => None,
        }
    }
}
