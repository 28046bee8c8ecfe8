// src/error.rs
use std::io;
use thiserror::Error;

use crate::process::ProcessError;

// Re-export anyhow's Result type
pub use anyhow::Result;

/// Custom Error type for the gatewarden library
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Retry error: {0}")]
    Retry(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Restart error: {0}")]
    Restart(String),

    #[error("Stats error: {0}")]
    Stats(String),

    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl SupervisorError {
    /// Build the error reported once a retried operation runs out of attempts
    pub fn retry(context: &str, attempts: usize, err: impl std::fmt::Display) -> Self {
        SupervisorError::Retry(format!(
            "{} failed after {} attempts: {}",
            context, attempts, err
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_message_names_context_and_attempts() {
        let err = SupervisorError::retry("restart ai.gateway", 3, "exit status 1");
        assert_eq!(
            err.to_string(),
            "Retry error: restart ai.gateway failed after 3 attempts: exit status 1"
        );
    }

    #[test]
    fn test_process_error_converts() {
        let err: SupervisorError = ProcessError::Configuration("empty argv".to_string()).into();
        assert!(matches!(err, SupervisorError::Process(_)));
    }
}
