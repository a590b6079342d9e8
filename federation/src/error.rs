use std::fmt;

use fed_data::DataError;
use sparse_ml::MlError;

/// All errors that can occur while running a federated experiment.
#[derive(Debug)]
pub enum FederationError {
    /// Invalid run configuration, caught before any client is built.
    InvalidConfig(String),
    /// The data layer failed to build or partition the task.
    Data(DataError),
    /// A numeric operation inside a client or the server model failed.
    Ml(MlError),
    /// Failed to write the log or history file.
    Io(std::io::Error),
}

impl fmt::Display for FederationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Data(e) => write!(f, "data error: {e}"),
            Self::Ml(e) => write!(f, "model error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for FederationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Data(e) => Some(e),
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataError> for FederationError {
    fn from(e: DataError) -> Self {
        Self::Data(e)
    }
}

impl From<MlError> for FederationError {
    fn from(e: MlError) -> Self {
        Self::Ml(e)
    }
}

impl From<std::io::Error> for FederationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, FederationError>;
