use std::path::PathBuf;

use clap::{Args, ValueEnum};

use fed_data::{DatasetKind, Partition};
use federation::{ExperimentKind, RunConfig, TrainMode};
use sparse_ml::{GrowthPolicy, PruningType, SparsityDistribution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetArg {
    Mnist,
    Emnist,
    Cifar10,
    Cifar100,
}

impl From<DatasetArg> for DatasetKind {
    fn from(a: DatasetArg) -> Self {
        match a {
            DatasetArg::Mnist => DatasetKind::Mnist,
            DatasetArg::Emnist => DatasetKind::Emnist,
            DatasetArg::Cifar10 => DatasetKind::Cifar10,
            DatasetArg::Cifar100 => DatasetKind::Cifar100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DistributionArg {
    Dirichlet,
    Lotteryfl,
    Iid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RateDecayArg {
    Constant,
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SparsityDistributionArg {
    Uniform,
    Er,
    Erk,
}

impl From<SparsityDistributionArg> for SparsityDistribution {
    fn from(a: SparsityDistributionArg) -> Self {
        match a {
            SparsityDistributionArg::Uniform => SparsityDistribution::Uniform,
            SparsityDistributionArg::Er => SparsityDistribution::Er,
            SparsityDistributionArg::Erk => SparsityDistribution::Erk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PruningTypeArg {
    Hard,
    Soft,
}

impl From<PruningTypeArg> for PruningType {
    fn from(a: PruningTypeArg) -> Self {
        match a {
            PruningTypeArg::Hard => PruningType::Hard,
            PruningTypeArg::Soft => PruningType::Soft,
        }
    }
}

/// Option surface shared by every experiment binary; defaults follow the
/// original scripts.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Learning rate for local SGD
    #[arg(long, default_value_t = 0.01)]
    pub eta: f32,

    /// Number of clients sampled per round
    #[arg(long, default_value_t = 20)]
    pub clients: usize,

    /// Number of global rounds
    #[arg(long, default_value_t = 400)]
    pub rounds: usize,

    /// Number of local epochs
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Dataset to use
    #[arg(long, value_enum, default_value_t = DatasetArg::Mnist)]
    pub dataset: DatasetArg,

    /// How samples are distributed across clients
    #[arg(long, value_enum, default_value_t = DistributionArg::Dirichlet)]
    pub distribution: DistributionArg,

    /// Beta (unbalance rate) for the Dirichlet distribution
    #[arg(long, default_value_t = 0.1)]
    pub beta: f32,

    /// Split the dataset between this many clients
    #[arg(long, default_value_t = 400)]
    pub total_clients: usize,

    /// Minimum samples required for a client to participate
    #[arg(long, default_value_t = 0)]
    pub min_samples: usize,

    /// Samples per client (per class for lotteryfl)
    #[arg(long, default_value_t = 20)]
    pub samples_per_client: usize,

    /// Coefficient of the proximal term (FedProx)
    #[arg(long, default_value_t = 0.0)]
    pub prox: f32,

    /// Hidden layer sizes; omit to use the dataset default
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub hidden_size: Vec<usize>,

    /// Sparsity from 0 to 1
    #[arg(long, default_value_t = 0.1)]
    pub sparsity: f32,

    /// Annealing for the readjustment ratio
    #[arg(long, value_enum, default_value_t = RateDecayArg::Cosine)]
    pub rate_decay_method: RateDecayArg,

    /// Round to end annealing (default: rounds / 2)
    #[arg(long)]
    pub rate_decay_end: Option<usize>,

    /// Readjust this fraction of the kept weights each time
    #[arg(long, default_value_t = 0.5)]
    pub readjustment_ratio: f32,

    /// First epoch number when masks readjust
    #[arg(long, default_value_t = 9)]
    pub pruning_begin: usize,

    /// Epochs between readjustments
    #[arg(long, default_value_t = 10)]
    pub pruning_interval: usize,

    /// Rounds between readjustments
    #[arg(long, default_value_t = 10)]
    pub rounds_between_readjustments: usize,

    /// Remember a client's old weights when aggregating missing ones
    #[arg(long)]
    pub remember_old: bool,

    /// How kept-weight budgets spread across layers
    #[arg(long, value_enum, default_value_t = SparsityDistributionArg::Erk)]
    pub sparsity_distribution: SparsityDistributionArg,

    /// Final sparsity to grow to (default: same as --sparsity)
    #[arg(long)]
    pub final_sparsity: Option<f32>,

    /// Hard or soft pruning
    #[arg(long, value_enum, default_value_t = PruningTypeArg::Hard)]
    pub pruning_type: PruningTypeArg,

    /// Local mini-batch size
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// L2 regularization strength
    #[arg(long, default_value_t = 0.001)]
    pub l2: f32,

    /// Local SGD momentum
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f32,

    /// Minibatches to test on, 0 for all of them
    #[arg(long, default_value_t = 0)]
    pub test_batches: usize,

    /// Evaluate on the test sets every N rounds
    #[arg(long, default_value_t = 10)]
    pub eval_every: usize,

    /// Minimum votes required to keep a weight
    #[arg(long, default_value_t = 0)]
    pub min_votes: usize,

    /// Skip evaluation sweeps entirely
    #[arg(long)]
    pub no_eval: bool,

    /// Upload weights as fp16
    #[arg(long)]
    pub fp16: bool,

    /// Log file; round output is mirrored into it and the evaluation
    /// history lands next to it as <outfile>.csv
    #[arg(short, long)]
    pub outfile: Option<PathBuf>,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl CommonOpts {
    /// Assembles the run configuration for an experiment family; the
    /// per-binary extras are layered on by the caller.
    pub fn run_config(&self, kind: ExperimentKind) -> RunConfig {
        let growth = if kind == ExperimentKind::RandomMask {
            GrowthPolicy::Random
        } else {
            GrowthPolicy::Gradient
        };
        RunConfig {
            kind,
            dataset: self.dataset.into(),
            partition: match self.distribution {
                DistributionArg::Iid => Partition::Iid,
                DistributionArg::Dirichlet => Partition::Dirichlet { beta: self.beta },
                DistributionArg::Lotteryfl => Partition::LotteryFl,
            },
            total_clients: self.total_clients,
            clients_per_round: self.clients,
            rounds: self.rounds,
            epochs: self.epochs,
            batch_size: self.batch_size,
            eta: self.eta,
            momentum: self.momentum,
            l2: self.l2,
            prox: self.prox,
            loss_scaling: 1.0,
            hidden: self.hidden_size.clone(),
            sparsity: self.sparsity,
            final_sparsity: self.final_sparsity.unwrap_or(self.sparsity),
            readjustment_ratio: self.readjustment_ratio,
            constant_rate: self.rate_decay_method == RateDecayArg::Constant,
            rate_decay_end: self.rate_decay_end.unwrap_or(self.rounds / 2),
            rounds_between_readjustments: self.rounds_between_readjustments,
            pruning_begin: self.pruning_begin,
            pruning_interval: self.pruning_interval,
            sparsity_distribution: self.sparsity_distribution.into(),
            pruning_type: self.pruning_type.into(),
            growth,
            min_votes: self.min_votes as f32,
            remember_old: self.remember_old,
            fp16: self.fp16,
            samples_per_client: self.samples_per_client,
            min_samples: self.min_samples,
            test_batches: self.test_batches,
            eval_every: self.eval_every,
            eval: !self.no_eval,
            seed: self.seed,
            outfile: self.outfile.clone(),
            initial_rounds: 0,
            retrain_rounds: 0,
            train_mode: TrainMode::Standard,
        }
    }
}

/// Maps the original `--type-value` integer onto a training mode.
pub fn train_mode_from_type_value(v: u8) -> TrainMode {
    match v {
        1 => TrainMode::FullUse,
        2 => TrainMode::Dpf,
        _ => TrainMode::PartUse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        common: CommonOpts,
    }

    #[test]
    fn defaults_match_the_scripts() {
        let h = Harness::try_parse_from(["t"]).unwrap();
        let c = h.common;
        assert_eq!(c.eta, 0.01);
        assert_eq!(c.clients, 20);
        assert_eq!(c.rounds, 400);
        assert_eq!(c.epochs, 10);
        assert_eq!(c.total_clients, 400);
        assert_eq!(c.samples_per_client, 20);
        assert_eq!(c.sparsity, 0.1);
        assert_eq!(c.readjustment_ratio, 0.5);
        assert_eq!(c.pruning_begin, 9);
        assert_eq!(c.pruning_interval, 10);
        assert_eq!(c.rounds_between_readjustments, 10);
        assert_eq!(c.batch_size, 32);
        assert_eq!(c.l2, 0.001);
        assert_eq!(c.momentum, 0.9);
        assert_eq!(c.eval_every, 10);
        assert_eq!(c.seed, 42);
        assert!(!c.remember_old);
        assert!(!c.fp16);
    }

    #[test]
    fn derived_defaults_fill_in() {
        let h = Harness::try_parse_from(["t", "--rounds", "100"]).unwrap();
        let cfg = h.common.run_config(ExperimentKind::Dst);
        assert_eq!(cfg.rate_decay_end, 50);
        assert_eq!(cfg.final_sparsity, cfg.sparsity);
        assert!(cfg.eval);
    }

    #[test]
    fn dirichlet_carries_beta() {
        let h = Harness::try_parse_from(["t", "--distribution", "dirichlet", "--beta", "0.5"])
            .unwrap();
        let cfg = h.common.run_config(ExperimentKind::Dst);
        assert_eq!(cfg.partition, Partition::Dirichlet { beta: 0.5 });
    }

    #[test]
    fn random_mask_switches_growth_policy() {
        let h = Harness::try_parse_from(["t"]).unwrap();
        let cfg = h.common.run_config(ExperimentKind::RandomMask);
        assert_eq!(cfg.growth, GrowthPolicy::Random);
        let cfg = h.common.run_config(ExperimentKind::Dst);
        assert_eq!(cfg.growth, GrowthPolicy::Gradient);
    }

    #[test]
    fn type_value_maps_to_train_mode() {
        assert_eq!(train_mode_from_type_value(0), TrainMode::PartUse);
        assert_eq!(train_mode_from_type_value(1), TrainMode::FullUse);
        assert_eq!(train_mode_from_type_value(2), TrainMode::Dpf);
    }

    #[test]
    fn hidden_size_accepts_a_list() {
        let h = Harness::try_parse_from(["t", "--hidden-size", "300", "100"]).unwrap();
        assert_eq!(h.common.hidden_size, vec![300, 100]);
    }
}
