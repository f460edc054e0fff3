//! Error types for the agenda ecosystem.

use thiserror::Error;

/// Errors that can occur in agenda operations.
///
/// `Transport` and `Timeout` abort a sync cycle. `Parse` and `Storage`
/// are entry-scoped when they happen while applying a single event.
#[derive(Error, Debug)]
pub enum AgendaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote request timed out after {0}s")]
    Timeout(u64),

    #[error("ICS parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AgendaError {
    /// Whether this error comes from talking to the calendar server.
    pub fn is_transport(&self) -> bool {
        matches!(self, AgendaError::Transport(_) | AgendaError::Timeout(_))
    }
}

impl From<rusqlite::Error> for AgendaError {
    fn from(e: rusqlite::Error) -> Self {
        AgendaError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AgendaError {
    fn from(e: serde_json::Error) -> Self {
        AgendaError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for AgendaError {
    fn from(e: reqwest::Error) -> Self {
        AgendaError::Transport(e.to_string())
    }
}

/// Result type alias for agenda operations.
pub type AgendaResult<T> = Result<T, AgendaError>;
