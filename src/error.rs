//! Error types.
//!
//! The table itself has no recoverable failure paths: allocation failure is
//! fatal and index overflow is an assertion. Errors only arise at the raw
//! boundaries (kind decoding, configuration) and from `verify`.

use thiserror::Error;

/// The main error type for rsmegapage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A raw value does not name a megapage kind.
    #[error("invalid megapage kind value {0}")]
    InvalidKind(u8),

    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The snapshot chain violates one of its invariants.
    #[error("corrupt snapshot chain at generation {generation}: {reason}")]
    Corrupt {
        /// Generation (0 = current) where the violation was found.
        generation: usize,
        /// What was violated.
        reason: String,
    },
}

/// Errors produced while building a [`crate::TableConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A size that must be a power of two is not.
    #[error("{field} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// Field name.
        field: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// A value is outside its accepted range.
    #[error("{field} out of range: {value} ({expected})")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// The rejected value.
        value: usize,
        /// Human-readable constraint.
        expected: &'static str,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
