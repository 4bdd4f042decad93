// Error types for the analytics pipeline

use thiserror::Error;

/// Result type alias for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors that can occur while building or delivering analytics events
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Invalid or missing client options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The collection endpoint answered with a non-success status
    #[error("Error when sending {event_type} event: HTTP {status}: {body}")]
    Transport {
        event_type: String,
        status: u16,
        body: String,
    },

    /// The request could not be delivered at all
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A before-send or after-send hook failed
    #[error("Hook error: {0}")]
    Hook(String),

    /// Unknown plugin, action or event type
    #[error("Unknown {kind} '{name}'. Valid values: {}", valid.join(", "))]
    UnknownAction {
        kind: &'static str,
        name: String,
        valid: Vec<String>,
    },

    /// A command received arguments of the wrong shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalyticsError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AnalyticsError::Configuration(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        AnalyticsError::Storage(msg.into())
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        AnalyticsError::Hook(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        AnalyticsError::InvalidArgument(msg.into())
    }

    /// Create an unknown-action error listing the accepted names
    pub fn unknown(
        kind: &'static str,
        name: impl Into<String>,
        valid: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut valid: Vec<String> = valid.into_iter().map(Into::into).collect();
        valid.sort();
        AnalyticsError::UnknownAction {
            kind,
            name: name.into(),
            valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_names_event_type() {
        let err = AnalyticsError::Transport {
            event_type: "click".to_string(),
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error when sending click event: HTTP 503: unavailable"
        );
    }

    #[test]
    fn test_unknown_action_lists_sorted_alternatives() {
        let err = AnalyticsError::unknown("action", "addProdct", ["setAction", "addProduct"]);
        assert_eq!(
            err.to_string(),
            "Unknown action 'addProdct'. Valid values: addProduct, setAction"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = AnalyticsError::config("endpoint is required");
        assert_eq!(err.to_string(), "Configuration error: endpoint is required");
    }
}
