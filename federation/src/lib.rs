mod client;
mod config;
mod error;
mod metrics;
mod runner;
mod sampling;
mod server;

pub use client::{Client, EvalResult, RoundCtx, Update};
pub use config::{default_hidden, ExperimentKind, RunConfig, TrainMode};
pub use error::{FederationError, Result};
pub use metrics::{ClientRow, EvalPoint, History, OutputWriter, RunSummary, Stats};
pub use runner::Experiment;
pub use sampling::sample_clients;
pub use server::{aggregate, Aggregate};
