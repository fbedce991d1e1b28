//! Error types for minikv-fleet

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    // === Membership Errors ===
    #[error("Command failed: {command} (exit {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("No leader address has been published yet")]
    MissingLeader,

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    // === Render Errors ===
    #[error("Unable to determine store version")]
    VersionUnknown,

    // === Config Errors ===
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Retryable errors never latch progress; the scheduler is expected to
    /// deliver the same trigger again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CommandFailed { .. } | Error::MissingLeader)
    }

    /// Build a `CommandFailed` from a finished process.
    pub fn command_failed(command: impl Into<String>, output: &std::process::Output) -> Self {
        Error::CommandFailed {
            command: command.into(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        let failed = Error::CommandFailed {
            command: "etcdctl member add".into(),
            code: Some(1),
            stderr: "context deadline exceeded".into(),
        };
        assert!(failed.is_retryable());
        assert!(Error::MissingLeader.is_retryable());
        assert!(!Error::VersionUnknown.is_retryable());
        assert!(!Error::InvalidConfig("port".into()).is_retryable());
    }

    #[test]
    fn test_command_failed_display() {
        let failed = Error::CommandFailed {
            command: "etcdctl member list".into(),
            code: Some(2),
            stderr: "connection refused".into(),
        };
        let text = failed.to_string();
        assert!(text.contains("etcdctl member list"));
        assert!(text.contains("connection refused"));
    }
}
