use std::fmt;

/// The data crate's result type.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors produced while building or accessing federated datasets.
#[derive(Debug)]
pub enum DataError {
    /// The requested sample index is out of bounds.
    OutOfBounds { index: usize, len: usize },

    /// A partitioning or generation parameter is invalid.
    InvalidParameter(&'static str),

    /// Partitioning produced no eligible clients.
    NoClients { min_samples: usize },
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::OutOfBounds { index, len } => {
                write!(f, "sample index {index} is out of bounds for {len} samples")
            }
            DataError::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            DataError::NoClients { min_samples } => {
                write!(f, "no client kept at least {min_samples} samples")
            }
        }
    }
}

impl std::error::Error for DataError {}
