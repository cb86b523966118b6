// SPDX-License-Identifier: MIT
//
// CipherLink: Encrypted Point-to-Point Serial Link
// Copyright (c) 2025 CipherLink Contributors

//! Error types for the link
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.
//! Handshake timeouts and malformed tag bytes never show up here: the state machine
//! absorbs them by restarting.

use std::io::ErrorKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for link operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Argument or data validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Prime or exponent search ran out of candidates
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Handshake gave up after the configured number of attempts
    #[error("Handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    /// Stop was requested before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Serial line or console I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if error is transient and worth retrying when establishing a link
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Check if the peer went away
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Io(e) if matches!(
                e.kind(),
                ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset
            )
        )
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Io(std::io::Error::from(ErrorKind::TimedOut)).is_retryable());
        assert!(Error::Io(std::io::Error::from(ErrorKind::ConnectionRefused)).is_retryable());
        assert!(!Error::Io(std::io::Error::from(ErrorKind::PermissionDenied)).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::KeyGeneration("exhausted".into()).is_retryable());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::Io(std::io::Error::from(ErrorKind::UnexpectedEof)).is_disconnect());
        assert!(!Error::Cancelled.is_disconnect());
    }
}
