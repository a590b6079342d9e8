mod dataset;
mod error;
mod loader;
mod partition;
mod synthetic;

pub use dataset::{DatasetKind, InMemoryDataset};
pub use error::{DataError, Result};
pub use loader::{BatchRef, DataLoader};
pub use partition::{build_clients, ClientData, Partition};
pub use synthetic::SyntheticTask;
