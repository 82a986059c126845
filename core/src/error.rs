//! Error types shared by the data and auth providers.
//!
//! # Design
//! `NotFound` gets a dedicated variant because callers frequently distinguish
//! "the record does not exist" from "the server returned an unexpected
//! status." All other non-2xx responses land in `Http` with the status code,
//! the reason phrase and the raw body. The enum is `Clone` so a single refresh
//! outcome can be handed to every task waiting on it.

use thiserror::Error;

/// Errors returned by the Directus providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The server returned 404 for a single-record lookup.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status other than 404.
    #[error("HTTP {status} {status_text}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    /// `POST /auth/login` was rejected.
    #[error("authentication failed: HTTP {status} {status_text}")]
    Authentication { status: u16, status_text: String },

    /// No usable session is stored.
    #[error("not authenticated")]
    Unauthenticated,

    /// The transport could not complete the round-trip.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The access token is not a decodable JWT.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl ApiError {
    /// HTTP status carried by this error, if any.
    ///
    /// `Unauthenticated` reports 401 so the framework treats a missing session
    /// the same way as a rejected bearer token.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound => Some(404),
            ApiError::Http { status, .. } | ApiError::Authentication { status, .. } => Some(*status),
            ApiError::Unauthenticated => Some(401),
            ApiError::Transport(_)
            | ApiError::Serialization(_)
            | ApiError::Deserialization(_)
            | ApiError::InvalidToken(_) => None,
        }
    }

    /// True for 401 and 403, the statuses that end a session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}
