//! Error types for the steward orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Cloud API error: {0}")]
    ApiError(String),

    #[error("Provisioning step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

impl OrchestratorError {
    /// Attach the name of the provisioning step that produced this error.
    pub fn for_step(self, step: &str) -> Self {
        match self {
            OrchestratorError::StepFailed { .. } => self,
            other => OrchestratorError::StepFailed {
                step: step.to_string(),
                message: other.to_string(),
            },
        }
    }
}
