//! Errors of the client side

use thiserror::Error;

/// Everything that can go wrong talking to the notes service, or keeping changes around locally
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// No valid session, log in again
    #[error("Not logged in, please log in again")]
    Unauthenticated,

    /// Logged in, but not allowed to touch the note
    #[error("Not allowed: {0}")]
    Forbidden(String),

    /// The note does not exist (anymore)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The note changed since it was loaded
    #[error("This note was modified by another user, please reload")]
    Conflict {
        /// The version on the server, when it told us
        current_version: Option<i32>,
    },

    /// The request itself is wrong, like empty content
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Network or service unavailable, trying again later can help
    #[error("Service unavailable: {0}")]
    Transient(String),

    /// Unexpected failure of the service
    #[error("Something went wrong on the server: {0}")]
    Server(String),

    /// The service answered with something unexpected
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Pending changes could not be stored locally
    #[error("Could not store pending changes: {0}")]
    Storage(String),

    /// Changes made offline could not be saved
    #[error("{0} offline change(s) could not be saved, please review them")]
    Reconciliation(usize),
}

impl ClientError {
    /// Can trying again later make the request succeed?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Server(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Validation(err.to_string())
        } else {
            // timeouts, refused connections and broken bodies alike
            Self::Transient(err.to_string())
        }
    }
}
