//! Error types for the core library.

use thiserror::Error;

use crate::reminder::{CandidateError, ReminderId};
use crate::service::MailError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No reminder exists with the given ID.
    #[error("Reminder not found: {0}")]
    NotFound(ReminderId),

    /// A reminder with this ID is already stored.
    #[error("Reminder already exists: {0}")]
    Duplicate(ReminderId),

    /// A candidate email could not be turned into a reminder.
    #[error("Candidate rejected: {0}")]
    Candidate(#[from] CandidateError),

    /// The mail collaborator failed.
    #[error("Mail transport error: {0}")]
    Transport(#[from] MailError),

    /// Every scheduled offset of the reminder has already fired.
    #[error("Reminder {0} has no unfired offsets left")]
    AlreadyCompleted(ReminderId),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if this error is a lookup on an unknown reminder ID.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns the underlying cause, if the error wraps one.
    ///
    /// Used by the presentation layer to fill the `details` field of a
    /// failure response.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Candidate(e) => Some(e.to_string()),
            Self::Transport(e) => Some(e.to_string()),
            Self::Database(e) => Some(e.to_string()),
            Self::Serde(e) => Some(e.to_string()),
            Self::NotFound(_)
            | Self::Duplicate(_)
            | Self::AlreadyCompleted(_)
            | Self::Config(_) => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
