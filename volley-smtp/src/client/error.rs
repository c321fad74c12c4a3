//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur while talking to an SMTP server.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The server did not answer within the configured time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The requested operation needs a capability the server did not offer.
    #[error("Server does not support {0}")]
    Unsupported(&'static str),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Returns `true` when the underlying connection can no longer be used.
    ///
    /// Only a locally refused operation leaves the connection intact;
    /// everything else leaves the byte stream in an unknown state.
    #[must_use]
    pub const fn breaks_connection(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
