//! Error types for Juggle
//!
//! Centralized error handling using thiserror. Only setup failures and
//! runner invocation failures ever escape the agent loop; everything else the
//! loop encounters is reported through `AgentLoopResult`.

use thiserror::Error;

/// All error types that can occur in Juggle
#[derive(Debug, Error)]
pub enum JuggleError {
    /// Session not found in storage
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Work item not found in storage
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Record violates a state invariant
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Prompt could not be produced for a session
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Agent process could not be spawned or its output captured
    #[error("Runner invocation failed: {0}")]
    RunnerInvocation(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Juggle operations
pub type Result<T> = std::result::Result<T, JuggleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_error() {
        let err = JuggleError::SessionNotFound("auth-rework".to_string());
        assert_eq!(err.to_string(), "Session not found: auth-rework");
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = JuggleError::InvalidTransition("cannot start a complete item".to_string());
        assert_eq!(err.to_string(), "Invalid transition: cannot start a complete item");
    }

    #[test]
    fn test_runner_invocation_error() {
        let err = JuggleError::RunnerInvocation("claude: not found".to_string());
        assert_eq!(err.to_string(), "Runner invocation failed: claude: not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: JuggleError = io_err.into();
        assert!(matches!(err, JuggleError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: JuggleError = json_err.into();
        assert!(matches!(err, JuggleError::Json(_)));
    }
}
