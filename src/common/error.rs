//! Error types for sketch operations

use std::fmt;

/// Errors that can occur during sketch operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SketchError {
    /// Invalid parameter provided to sketch constructor or operation
    ///
    /// Covers out-of-range `K`, negative ranks/fractions, non-monotonic
    /// split points, and down-sampling ratios that are not a power of two.
    InvalidParameter {
        /// Parameter name
        param: String,
        /// Invalid value provided
        value: String,
        /// Constraint that was violated
        constraint: String,
    },

    /// The sketch (or an operation on it) is in a state that forbids the
    /// requested mutation: a reservoir that has exceeded its maximum
    /// lifetime count, a VarOpt sample shrunk below its minimum size, or a
    /// write attempted through a read-only wrapped view.
    InvalidState {
        /// Description of the offending state
        reason: String,
    },

    /// Error during serialization
    SerializationError(String),

    /// Error during deserialization
    DeserializationError(String),

    /// A serialized buffer failed preamble validation: bad `serVer`, bad
    /// family id, a `preLongs`/flags contradiction, or a buffer shorter
    /// than the preamble or the retained item count require.
    CorruptFormat(String),

    /// A write was attempted on a sketch backed by a read-only memory
    /// region (a `wrap()`-ed compact view).
    ReadOnly,

    /// A memory-backed sketch needed to grow its backing region and the
    /// caller-supplied allocator callback refused the request.
    OutOfCapacity {
        /// Bytes requested from the allocator
        requested: usize,
    },

    /// Attempted to merge incompatible sketches
    IncompatibleSketches {
        /// Reason for incompatibility
        reason: String,
    },
}

impl fmt::Display for SketchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SketchError::InvalidParameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid parameter '{}': value '{}' {}",
                    param, value, constraint
                )
            }
            SketchError::InvalidState { reason } => write!(f, "Invalid state: {}", reason),
            SketchError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            SketchError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            SketchError::CorruptFormat(msg) => write!(f, "Corrupt format: {}", msg),
            SketchError::ReadOnly => write!(f, "attempted to write through a read-only view"),
            SketchError::OutOfCapacity { requested } => {
                write!(f, "allocator refused to grow region to {} bytes", requested)
            }
            SketchError::IncompatibleSketches { reason } => {
                write!(f, "Incompatible sketches: {}", reason)
            }
        }
    }
}

impl std::error::Error for SketchError {}

/// Result type alias for sketch operations
pub type Result<T> = std::result::Result<T, SketchError>;

impl SketchError {
    /// Shorthand for the common "parameter out of range" case.
    pub fn invalid_k(k: impl fmt::Display, min: u16, max: u16) -> Self {
        SketchError::InvalidParameter {
            param: "k".to_string(),
            value: k.to_string(),
            constraint: format!("must be in [{min}, {max}]"),
        }
    }
}
