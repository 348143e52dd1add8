//! Error types for rangemend

use std::fmt;

/// Result type alias for rangemend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for rangemend
#[derive(Debug)]
pub enum Error {
    /// IO errors
    Io(std::io::Error),
    /// Configuration errors
    Config(String),
    /// Token range retrieval failed (topology source unreachable)
    Topology(String),
    /// A node rejected a repair command
    Dispatch(String),
    /// Persistent store errors
    Store(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Topology(msg) => write!(f, "Topology error: {}", msg),
            Error::Dispatch(msg) => write!(f, "Dispatch error: {}", msg),
            Error::Store(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
