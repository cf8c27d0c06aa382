//! Error Types
//!
//! This module defines the error taxonomy for fleet operations.
//!
//! The split matters to callers: `Connection` means the host never answered
//! (and has been marked offline), `Execution` means the transport died while
//! a session was up, and `Provisioning` means the remote command ran but
//! reported a failure that is not on the operation's tolerated list.

/// Error types for fleet operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session could not be opened (network or authentication failure)
    #[error("could not connect to {host}: {message}")]
    Connection { host: String, message: String },

    /// Transport-level fault while executing a command on an open session
    #[error("command execution failed: {0}")]
    Execution(String),

    /// Remote command reported a non-tolerated failure
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Fleet or account registry error
    #[error("registry error: {0}")]
    Registry(String),

    /// Invalid input rejected before any session was opened
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Execution(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
