use std::fmt;

/// The sparse-model crate's result type.
pub type Result<T> = std::result::Result<T, MlError>;

/// Errors produced by sparse models when inputs are invalid.
#[derive(Debug)]
pub enum MlError {
    /// An input is invalid for semantic or domain reasons.
    InvalidInput(&'static str),

    /// A shape invariant was violated (e.g. mismatched lengths).
    ShapeMismatch {
        /// Human-readable context for the mismatch (e.g. "layers", "batch").
        what: &'static str,
        /// Observed value.
        got: usize,
        /// Expected value.
        expected: usize,
    },

    /// A gradient buffer was consumed before any backward pass filled it.
    MissingGradients,
}

impl fmt::Display for MlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlError::ShapeMismatch {
                what,
                got,
                expected,
            } => {
                write!(f, "shape mismatch for {what}: got {got}, expected {expected}")
            }
            MlError::MissingGradients => write!(f, "gradients requested before a backward pass"),
        }
    }
}

impl std::error::Error for MlError {}
