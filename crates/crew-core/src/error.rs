//! Error types shared across the crew crates.

/// The result type used throughout crew-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier string could not be parsed.
    #[error("invalid id: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// A coordinate was outside the valid latitude/longitude range.
    #[error("invalid coordinate: {message}")]
    InvalidCoordinate {
        /// Description of the invalid value.
        message: String,
    },

    /// A monetary amount failed validation.
    #[error("invalid amount: {message}")]
    InvalidAmount {
        /// Description of the invalid value.
        message: String,
    },
}
