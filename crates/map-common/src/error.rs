//! Error types for the map-composition crates.

use thiserror::Error;

/// Result type alias using MapError.
pub type MapResult<T> = Result<T, MapError>;

/// Primary error type across configuration resolution, providers and
/// discovery.
#[derive(Debug, Error)]
pub enum MapError {
    // === Session-terminal failures ===
    #[error("Failed to load map configuration: {0}")]
    ConfigLoad(String),

    #[error("Credential rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("Map not found: {0}")]
    MapNotFound(String),

    // === Per-layer failures ===
    #[error("Provider error for layer '{layer}': {message}")]
    Provider { layer: String, message: String },

    #[error("Layer is not editable: {0}")]
    NotEditable(String),

    // === Operator-facing discovery failures ===
    #[error("Discovery failed: {message} (likely causes: timeout or CORS; consider the proxy)")]
    Discovery { message: String },

    #[error("Capabilities document could not be parsed: {0}")]
    CapabilitiesParse(String),

    // === Editing ===
    #[error("Saving edits failed: {0}")]
    EditSave(String),

    // === Transport / serialization ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapError {
    /// Whether this failure stems from a rejected/expired credential,
    /// which the embedding host handles differently from plain network
    /// failures.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, MapError::Unauthorized { .. })
    }

    /// Whether this failure is terminal for the whole session (as opposed
    /// to a single layer or a single optional enhancement).
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            MapError::ConfigLoad(_) | MapError::Unauthorized { .. } | MapError::MapNotFound(_)
        )
    }
}

impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> Self {
        MapError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MapError::Unauthorized { status: 401 }.is_credential_failure());
        assert!(MapError::Unauthorized { status: 403 }.is_session_terminal());
        assert!(MapError::ConfigLoad("timeout".into()).is_session_terminal());
        assert!(!MapError::Provider {
            layer: "roads".into(),
            message: "bad params".into()
        }
        .is_session_terminal());
    }
}
