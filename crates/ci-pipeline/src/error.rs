//! Error types for pipeline planning and execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration conflict: {0}")]
    ConfigConflict(String),

    #[error("Stage {0} has empty command")]
    EmptyCommand(String),

    #[error("Stage {stage} failed to spawn `{program}`: {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {stage} timed out after {timeout_secs} seconds")]
    Timeout { stage: String, timeout_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Process exit code the CLI reports for this error.
    ///
    /// Follows shell conventions: 124 for timeouts, 127 for a missing program.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Timeout { .. } => 124,
            PipelineError::Spawn { .. } => 127,
            _ => 1,
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_shell_conventions() {
        let timeout = PipelineError::Timeout {
            stage: "build".to_string(),
            timeout_secs: 5,
        };
        assert_eq!(timeout.exit_code(), 124);

        let spawn = PipelineError::Spawn {
            stage: "build".to_string(),
            program: "cross".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(spawn.exit_code(), 127);
        assert!(spawn.to_string().contains("cross"));

        let conflict = PipelineError::ConfigConflict("nope".to_string());
        assert_eq!(conflict.exit_code(), 1);
    }
}
