//! Error types for ring construction.

/// Errors produced when building a [`KeySpace`](crate::KeySpace).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingError {
    /// The ring exponent is outside `[1, 32]`.
    #[error("ring exponent {0} outside [1, 32]")]
    InvalidExponent(u8),
}
