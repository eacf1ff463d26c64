//! Unified error handling for the hike-tracker library.
//!
//! Every fallible operation returns [`Result`]. Nothing in the recording core
//! panics: invalid state transitions, IO trouble and corrupt records all come
//! back as a [`TrackerError`] value the caller can react to.

use thiserror::Error;

use crate::session::TrackingPhase;
use crate::Track;

/// Unified error type for hike-tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A session method was called in a phase that forbids it.
    #[error("cannot {operation} a session that is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: TrackingPhase,
    },

    /// Filesystem failure (disk full, permissions, missing directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite failure
    #[cfg(feature = "persistence")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record could not be encoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// A stored record exists but cannot be decoded.
    #[error("corrupt record '{record}': {message}")]
    CorruptRecord { record: String, message: String },

    /// A track was finalized but could not be written to the store.
    /// The finished track travels with the error so it is never lost.
    #[error("track {} was stopped but not saved: {message}", track.id)]
    SaveFailed { track: Box<Track>, message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl TrackerError {
    pub(crate) fn invalid_transition(operation: &'static str, phase: TrackingPhase) -> Self {
        TrackerError::InvalidTransition { operation, phase }
    }

    pub(crate) fn corrupt(record: impl Into<String>, err: impl std::fmt::Display) -> Self {
        TrackerError::CorruptRecord {
            record: record.into(),
            message: err.to_string(),
        }
    }

    /// True when the error came from storage rather than from caller misuse.
    pub fn is_io_failure(&self) -> bool {
        match self {
            TrackerError::Io(_) | TrackerError::Serialization { .. } => true,
            #[cfg(feature = "persistence")]
            TrackerError::Database(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for hike-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Extension trait for converting Option to TrackerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an invalid transition error.
    fn ok_or_transition(self, operation: &'static str, phase: TrackingPhase) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_transition(self, operation: &'static str, phase: TrackingPhase) -> Result<T> {
        self.ok_or_else(|| TrackerError::invalid_transition(operation, phase))
    }
}
