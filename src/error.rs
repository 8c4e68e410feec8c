//! Error types for inbox-sync.

use std::fmt;
use std::io;

/// Main error type for sync and storage operations.
#[derive(Debug)]
pub enum Error {
    /// I/O errors (network listeners, file operations)
    Io(io::Error),
    /// `SQLite` errors, including uniqueness violations during commit
    Database(String),
    /// The mail source could not be reached or refused the request
    Source(SourceError),
    /// A message violated the pipeline's input contract
    Contract(String),
    /// Configuration errors
    Config(String),
}

/// Failures surfaced by a mail source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Missing, expired or rejected credentials
    Auth(String),
    /// Connection, timeout or transport failure
    Network(String),
    /// Unexpected status code from the provider
    Status(u16, String),
    /// Response body could not be decoded
    Decode(String),
}

/// Failures of the external classification call.
///
/// These never leave the classification gateway; they only decide the text
/// of the fallback summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// No API key configured
    MissingCredential,
    /// Connection or timeout failure
    Network(String),
    /// Non-success status from the inference API (quota, auth, ...)
    Status(u16, String),
    /// Response was not the expected JSON shape
    Malformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Database(msg) => write!(f, "database error: {msg}"),
            Self::Source(e) => write!(f, "mail source error: {e}"),
            Self::Contract(msg) => write!(f, "contract violation: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Status(code, msg) => write!(f, "provider returned {code}: {msg}"),
            Self::Decode(msg) => write!(f, "could not decode response: {msg}"),
        }
    }
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "classification API key not set"),
            Self::Network(msg) => write!(f, "classification request failed: {msg}"),
            Self::Status(code, msg) => write!(f, "classification API returned {code}: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed classification response: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Source(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for SourceError {}

impl std::error::Error for ClassifyError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io_err) => io_err,
            other => Self::other(other.to_string()),
        }
    }
}

/// Result type alias for inbox-sync operations.
pub type Result<T> = std::result::Result<T, Error>;
