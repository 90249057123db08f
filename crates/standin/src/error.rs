//! Error types for the standin mock server.

use thiserror::Error;

/// Error type covering caller misuse and internal faults.
///
/// Registration and lifecycle errors propagate synchronously to the caller.
/// Evaluation faults never cross the socket boundary; the dispatcher converts
/// them into 500-class responses.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid port argument supplied to `start`
    #[error("Invalid port number provided - {0}")]
    InvalidPort(String),

    /// Invalid host argument supplied to `start`
    #[error("Invalid host provided - {0}")]
    InvalidHost(String),

    /// Malformed interaction rejected at registration
    #[error("{0}")]
    InvalidInteraction(String),

    /// Malformed matching rule embedded in an expectation tree
    #[error("Invalid match rule - {0}")]
    InvalidRule(String),

    /// `start` called while the server is already listening
    #[error("Mock server is already listening on port {0}")]
    AlreadyStarted(u16),

    /// Listening socket could not be bound
    #[error("Failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Regex rule failed to compile during evaluation
    #[error("Invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
