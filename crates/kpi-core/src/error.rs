//! Error types for KPI operations.
//!
//! This module defines [`KpiError`] which covers every failure that can occur
//! while fetching, validating, or caching KPI data.

use thiserror::Error;

/// Errors that can occur during KPI operations.
///
/// The type is `Clone` because a single in-flight fetch result is handed to
/// every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KpiError {
    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream API answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, JSON or plain text, kept verbatim.
        body: String,
    },

    /// The response body was not valid JSON or lacked expected fields.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A record or period could not be validated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error interacting with the request cache.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl KpiError {
    /// Returns true for failures of the transport itself (rejected fetch or non-2xx).
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. })
    }

    /// Returns true when the response arrived but could not be understood.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

/// Result type alias using [`KpiError`].
pub type Result<T> = std::result::Result<T, KpiError>;
