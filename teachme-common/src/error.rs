//! Error types for the TeachMe backend.

use thiserror::Error;

/// Result type alias using the TeachMe error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the TeachMe backend.
///
/// Malformed identifiers and missing records are deliberately distinct
/// variants even though both surface as 400 responses; upstream failures
/// (document store, LLM provider) are a third kind and map to 502.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing input (e.g. a blank conversation id)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A record or session that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document-store or LLM-provider call failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Structured LLM output that could not be parsed. Recovered locally by
    /// post-processing; never reaches a client.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this is a not-found error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is an upstream (collaborator) error.
    pub const fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }

    /// Get the HTTP status code for this error.
    ///
    /// Missing records report 400 rather than 404: a conversation id that
    /// does not resolve is treated as a bad request on this API surface.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::NotFound(_) => 400,
            Self::Upstream(_) => 502,
            Self::Parse(_) | Self::Internal(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Upstream(format!("database: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(Error::NotFound("x".into()).status_code(), 400);
        assert_eq!(Error::Upstream("x".into()).status_code(), 502);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_kind_predicates() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(!Error::InvalidInput("x".into()).is_not_found());
        assert!(Error::Upstream("x".into()).is_upstream());
    }

    #[test]
    fn test_json_error_becomes_parse() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(Error::from(err), Error::Parse(_)));
    }
}
