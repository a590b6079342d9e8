mod error;
mod layer;
mod loss;
pub mod models;
mod net;
mod optimizer;
mod prune;
pub mod schedule;

pub use error::{MlError, Result};
pub use layer::{Activation, MaskedDense};
pub use loss::{argmax_rows, CrossEntropy};
pub use net::{NetState, PrunableNet, PruningType};
pub use optimizer::Sgd;
pub use prune::{GrowthPolicy, SparsityDistribution};
