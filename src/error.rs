//! FTP error types

use thiserror::Error;

/// FTP protocol and connection errors
#[derive(Error, Debug)]
pub enum FtpError {
    /// Operation invoked before `connect` or after the session closed
    #[error("Session not connected")]
    NotConnected,

    /// `connect` invoked on a session that already connected once
    #[error("Session already connected")]
    AlreadyConnected,

    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Control or data connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Reply could not be framed or its code parsed
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// Well-formed reply with the wrong code for the exchange
    #[error("FTP error {code} (expected {expected}): {message}")]
    UnexpectedReply {
        /// Reply code the exchange requires
        expected: u16,
        /// Reply code the server actually sent
        code: u16,
        /// Message text of the offending reply
        message: String,
    },

    /// A structured payload (PASV, PWD, MDTM, MLST, ...) did not match its grammar
    #[error("Parse error: {0}")]
    Parse(String),

    /// The server does not advertise a capability the operation needs
    #[error("Server does not support {0}")]
    FeatureUnsupported(&'static str),

    /// A protocol error whose resource teardown also failed
    ///
    /// `source` is the original failure; `related` collects errors raised
    /// while closing the data socket or listener afterwards.
    #[error("{source} (cleanup also failed)")]
    Cleanup {
        /// The error that triggered teardown
        source: Box<FtpError>,
        /// Errors from the teardown itself
        related: Vec<FtpError>,
    },
}

impl FtpError {
    /// Attach teardown failures to a primary error.
    ///
    /// Returns the primary error unchanged when `related` is empty.
    pub fn with_cleanup(self, related: Vec<FtpError>) -> FtpError {
        if related.is_empty() {
            self
        } else {
            FtpError::Cleanup {
                source: Box::new(self),
                related,
            }
        }
    }
}

/// Result type alias using FtpError
pub type Result<T> = std::result::Result<T, FtpError>;
