use thiserror::Error;

/// Failure taxonomy for the judge core.
///
/// Only `InvalidSpec` is reported to the caller before a job exists; the
/// remaining kinds surface as an `ERROR` verdict on the job response.
/// Child-process faults (stderr output, kills, non-zero exits) are never
/// errors — they are adjudicated into verdicts.
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("invalid lifecycle transition: {0}")]
    InvalidState(String),

    #[error("failed to spawn child process: {message}")]
    Spawn {
        message: String,
        /// Output captured before the failure; empty when the child never
        /// started.
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("filesystem operation failed: {0}")]
    Filesystem(String),
}

impl JudgeError {
    /// Spawn-class failure with nothing captured yet.
    pub fn spawn(message: impl Into<String>) -> Self {
        JudgeError::Spawn {
            message: message.into(),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }
}

impl From<std::io::Error> for JudgeError {
    fn from(e: std::io::Error) -> Self {
        JudgeError::Filesystem(e.to_string())
    }
}
