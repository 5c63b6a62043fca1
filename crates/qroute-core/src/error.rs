//! Error types for qroute-core

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for qroute-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Classification failure: {0}")]
    ClassificationFailure(String),

    #[error("Responder not found: {0}")]
    ResponderNotFound(String),

    #[error("Responder '{responder}' failed: {message}")]
    ResponderExecution { responder: String, message: String },

    #[error("Workflow timed out after {0:?}")]
    WorkflowTimeout(Duration),

    #[error("Downstream generation failure: {0}")]
    DownstreamGeneration(String),

    #[error("Generation API error: {0}")]
    GenerationApi(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a responder execution error
    pub fn responder(responder: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResponderExecution {
            responder: responder.into(),
            message: message.into(),
        }
    }

    /// Coarse kind of this error, safe to expose to callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ClassificationFailure(_) => ErrorKind::ClassificationFailure,
            Self::ResponderNotFound(_) => ErrorKind::ResponderNotFound,
            Self::ResponderExecution { .. } => ErrorKind::ResponderExecutionFailure,
            Self::WorkflowTimeout(_) => ErrorKind::WorkflowTimeout,
            Self::DownstreamGeneration(_) | Self::GenerationApi(_) | Self::Http(_) => {
                ErrorKind::DownstreamGenerationFailure
            }
            Self::Json(_) | Self::Config(_) | Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Structured error field carried in results and log metadata.
///
/// Never contains messages or identifiers from the underlying failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClassificationFailure,
    ResponderNotFound,
    ResponderExecutionFailure,
    WorkflowTimeout,
    DownstreamGenerationFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassificationFailure => "classification_failure",
            Self::ResponderNotFound => "responder_not_found",
            Self::ResponderExecutionFailure => "responder_execution_failure",
            Self::WorkflowTimeout => "workflow_timeout",
            Self::DownstreamGenerationFailure => "downstream_generation_failure",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for qroute-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            Error::responder("research", "boom").kind(),
            ErrorKind::ResponderExecutionFailure
        );
        assert_eq!(
            Error::GenerationApi("503".into()).kind(),
            ErrorKind::DownstreamGenerationFailure
        );
        assert_eq!(
            Error::WorkflowTimeout(Duration::from_secs(300)).kind(),
            ErrorKind::WorkflowTimeout
        );
        assert_eq!(Error::Other("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DownstreamGenerationFailure).unwrap();
        assert_eq!(json, "\"downstream_generation_failure\"");
        assert_eq!(ErrorKind::WorkflowTimeout.to_string(), "workflow_timeout");
    }
}
