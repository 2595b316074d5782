//! Control API error types with actionable suggestions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for control protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SpawnFailed,
    InvalidInput,
    CommandFailed,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::SpawnFailed => write!(f, "SPAWN_FAILED"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::CommandFailed => write!(f, "COMMAND_FAILED"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// An error response carried over the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// The engine executable or interpreter could not be started.
    pub fn spawn_failed(program: &str, error: &str) -> Self {
        Self {
            code: ErrorCode::SpawnFailed,
            message: format!("Failed to launch engine '{}': {}", program, error),
            suggestion: Some(format!(
                "Verify '{}' exists and is executable, and that KINETIC_ENGINE points at the engine script.",
                program
            )),
        }
    }

    /// A mode selection produced no usable detector capabilities.
    pub fn no_modes(requested: &[String]) -> Self {
        let requested = if requested.is_empty() {
            "(none)".to_string()
        } else {
            requested.join(", ")
        };
        Self {
            code: ErrorCode::InvalidInput,
            message: format!("No recognized tracking modes in: {}", requested),
            suggestion: Some(
                "Known modes: swipe, posture, wink, push, copy-paste, unified.".into(),
            ),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some("Check the command syntax and try again.".into()),
        }
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::CommandFailed,
            message: message.into(),
            suggestion: Some("Check the daemon log for the failing host command.".into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            suggestion: Some("This is an internal error. Please report it if it persists.".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_has_suggestion(err: &ApiError, context: &str) {
        assert!(
            err.suggestion.is_some(),
            "{} should carry a suggestion, got None",
            context
        );
    }

    #[test]
    fn test_spawn_failed_has_suggestion() {
        let err = ApiError::spawn_failed("python3", "No such file or directory");
        assert_has_suggestion(&err, "spawn_failed");
        assert!(err.message.contains("python3"));
        assert!(err.message.contains("No such file"));
        assert!(err.suggestion.as_ref().unwrap().contains("KINETIC_ENGINE"));
    }

    #[test]
    fn test_no_modes_lists_known_modes() {
        let err = ApiError::no_modes(&["juggling".to_string()]);
        assert_has_suggestion(&err, "no_modes");
        assert!(err.message.contains("juggling"));
        assert!(err.suggestion.as_ref().unwrap().contains("posture"));
    }

    #[test]
    fn test_no_modes_empty_selection() {
        let err = ApiError::no_modes(&[]);
        assert!(err.message.contains("(none)"));
    }

    #[test]
    fn test_invalid_input_with_custom_suggestion() {
        let err = ApiError::invalid_input_with_suggestion("bad request", "send valid JSON");
        assert_has_suggestion(&err, "invalid_input_with_suggestion");
        assert_eq!(err.suggestion.as_deref(), Some("send valid JSON"));
    }

    #[test]
    fn test_display_format() {
        let err = ApiError::internal("oops");
        let rendered = format!("{}", err);
        assert!(rendered.contains("[INTERNAL_ERROR]"));
        assert!(rendered.contains("oops"));
        assert!(rendered.contains("(hint:"));
    }

    #[test]
    fn test_json_round_trip() {
        let err = ApiError::command_failed("host command exited 1");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("COMMAND_FAILED"));
        let back: ApiError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
