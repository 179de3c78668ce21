//! Common error types used throughout watchstate.
//!
//! This mirrors the shape of a typical shared error enum in this codebase:
//! a small, closed set of variants with `Display` messages via `thiserror`
//! and a handful of constructor functions for ergonomic call sites.

/// Common error type for watchstate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The caller supplied a `State` that fails a basic invariant (missing
    /// GUIDs, wrong primary key state for the requested operation, etc).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A play-state conflict was detected between the canonical record and
    /// an incoming observation with ambiguous provenance.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed (reading a config/fixture file, etc).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A transient failure (lock contention, transport failure) that was
    /// retried at the lowest applicable layer and still failed.
    #[error("transient error: {0}")]
    Transient(String),

    /// An internal/unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Conflict error.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new Transient error.
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error should abort an entire batch commit rather than
    /// just be counted as a single failed row (see `watchstate_db::storage`).
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Io(_) | Self::Internal(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("state 42");
        assert_eq!(err.to_string(), "not found: state 42");

        let err = Error::database("locked");
        assert_eq!(err.to_string(), "database error: locked");

        let err = Error::conflict("watched disagreement");
        assert_eq!(err.to_string(), "conflict: watched disagreement");
    }

    #[test]
    fn test_batch_fatal_classification() {
        assert!(Error::transient("db locked").is_batch_fatal());
        assert!(!Error::invalid_input("missing guid").is_batch_fatal());
        assert!(!Error::not_found("x").is_batch_fatal());
        assert!(!Error::conflict("x").is_batch_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
