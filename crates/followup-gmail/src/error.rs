//! Error types for Gmail operations.

use followup_core::MailError;

/// Result type alias for Gmail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Gmail client error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error from the token endpoint.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Non-success answer from the Gmail API.
    #[error("Gmail API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// Response was well-formed but missing something we need.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true if the credentials were rejected.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::OAuth { .. } | Self::Api { status: 401 | 403, .. }
        )
    }
}

impl From<Error> for MailError {
    fn from(error: Error) -> Self {
        if error.is_auth() {
            return Self::Authentication(error.to_string());
        }
        match error {
            Error::Json(_) | Error::InvalidResponse(_) => Self::InvalidResponse(error.to_string()),
            _ => Self::Transport(error.to_string()),
        }
    }
}
