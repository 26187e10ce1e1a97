use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for filen-adapter operations
#[derive(Error, Debug)]
pub enum FilenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer stalled: no data for {0:?}")]
    Timeout(std::time::Duration),
}

impl FilenError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FilenError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, FilenError::AlreadyExists(_))
    }

    /// Convert into an `io::Error` for use inside `AsyncRead` adapters.
    ///
    /// The original error is kept as the inner error so it can be recovered
    /// with [`FilenError::from_io`].
    pub fn into_io(self) -> io::Error {
        match self {
            FilenError::Io(e) => e,
            other => {
                let kind = match &other {
                    FilenError::NotFound(_) => io::ErrorKind::NotFound,
                    FilenError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
                    FilenError::Cancelled => io::ErrorKind::Interrupted,
                    FilenError::Timeout(_) => io::ErrorKind::TimedOut,
                    FilenError::Unsupported(_) => io::ErrorKind::Unsupported,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }

    /// Recover a `FilenError` that went through [`FilenError::into_io`].
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<FilenError>()) {
            return FilenError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<FilenError>()) {
            Some(Ok(filen)) => *filen,
            _ => FilenError::Backend("unrecoverable stream error".to_string()),
        }
    }
}

impl From<ConfigError> for FilenError {
    fn from(err: ConfigError) -> Self {
        FilenError::Config(err.to_string())
    }
}

/// Result type alias for filen-adapter operations
pub type Result<T> = std::result::Result<T, FilenError>;
