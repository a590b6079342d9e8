use std::path::PathBuf;

use fed_data::{DatasetKind, Partition};
use sparse_ml::{GrowthPolicy, PruningType, SparsityDistribution};

use crate::error::{FederationError, Result};

/// Which experiment family a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    /// Federated dynamic sparse training (also FedAvg/FedProx with the
    /// readjustment ratio at zero).
    Dst,
    /// PruneFL: server-side mask readjustment from aggregated gradients.
    PruneFl,
    /// DST plus a per-client co-learner head on the penultimate feature.
    CoLearner,
    /// Random-regrowth ablation of the co-learner run.
    RandomMask,
    /// DST followed by a frozen-mask, hard-pruned retraining tail.
    HardRetrain,
    /// Each client trains two nets and merges them before upload.
    Ensemble,
    /// DST where a `TrainMode` decides how masked weights train locally.
    MaskRetrain,
}

impl ExperimentKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Dst => "dst",
            Self::PruneFl => "prunefl",
            Self::CoLearner => "ours",
            Self::RandomMask => "cs",
            Self::HardRetrain => "dst_hard_retrain",
            Self::Ensemble => "dst_ensemble",
            Self::MaskRetrain => "dst_mask_retrain",
        }
    }

    /// Whether clients readjust their masks during local training.
    pub fn clients_readjust(self) -> bool {
        !matches!(self, Self::PruneFl)
    }
}

/// How masked-out weights participate in local training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainMode {
    /// Mask applied to weights and gradients after every step.
    Standard,
    /// Gradients masked too; pruned weights never move.
    PartUse,
    /// Dense training; the mask is only imposed on upload.
    FullUse,
    /// Dynamic pruning with feedback: forward sees masked weights, the
    /// update lands on the dense copy.
    Dpf,
}

impl TrainMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::PartUse => "part_use",
            Self::FullUse => "full_use",
            Self::Dpf => "dpf",
        }
    }
}

/// Hidden layer sizes used when the CLI does not override them, following
/// the original per-dataset architectures (flattened to dense stacks).
pub fn default_hidden(dataset: DatasetKind) -> Vec<usize> {
    match dataset {
        DatasetKind::Mnist => vec![300, 100],
        DatasetKind::Emnist => vec![512, 256],
        DatasetKind::Cifar10 | DatasetKind::Cifar100 => vec![512, 256],
    }
}

/// Everything a run needs, assembled by the binaries from CLI options.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub kind: ExperimentKind,
    pub dataset: DatasetKind,
    pub partition: Partition,
    pub total_clients: usize,
    pub clients_per_round: usize,
    pub rounds: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub eta: f32,
    pub momentum: f32,
    pub l2: f32,
    pub prox: f32,
    pub loss_scaling: f32,
    pub hidden: Vec<usize>,

    pub sparsity: f32,
    pub final_sparsity: f32,
    pub readjustment_ratio: f32,
    /// Keep the readjustment ratio constant instead of cosine-annealing it.
    pub constant_rate: bool,
    pub rate_decay_end: usize,
    pub rounds_between_readjustments: usize,
    pub pruning_begin: usize,
    pub pruning_interval: usize,
    pub sparsity_distribution: SparsityDistribution,
    pub pruning_type: PruningType,
    pub growth: GrowthPolicy,
    pub min_votes: f32,
    pub remember_old: bool,
    pub fp16: bool,

    pub samples_per_client: usize,
    pub min_samples: usize,
    pub test_batches: usize,
    pub eval_every: usize,
    pub eval: bool,
    pub seed: u64,
    pub outfile: Option<PathBuf>,

    /// PruneFL only: rounds of single-client pruning before federation.
    pub initial_rounds: usize,
    /// Hard-retrain only: frozen-mask rounds appended after the main loop.
    pub retrain_rounds: usize,
    /// Mask-retrain only: how masked weights participate locally.
    pub train_mode: TrainMode,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let err = |msg: &str| Err(FederationError::InvalidConfig(msg.to_string()));
        if self.total_clients == 0 || self.clients_per_round == 0 {
            return err("client counts must be positive");
        }
        if self.rounds == 0 || self.epochs == 0 || self.batch_size == 0 {
            return err("rounds, epochs and batch size must be positive");
        }
        if !(0.0..=1.0).contains(&self.sparsity) || !(0.0..=1.0).contains(&self.final_sparsity) {
            return err("sparsity targets must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.readjustment_ratio) {
            return err("readjustment ratio must lie in [0, 1]");
        }
        if self.eta <= 0.0 {
            return err("learning rate must be positive");
        }
        if self.pruning_interval == 0 {
            return err("pruning interval must be positive");
        }
        Ok(())
    }

    /// One-line JSON echo of the settings, written at the top of each log so
    /// a results file is self-describing.
    pub fn describe(&self) -> String {
        let json = serde_json::json!({
            "experiment": self.kind.name(),
            "dataset": self.dataset.name(),
            "partition": format!("{:?}", self.partition),
            "total_clients": self.total_clients,
            "clients_per_round": self.clients_per_round,
            "rounds": self.rounds,
            "epochs": self.epochs,
            "batch_size": self.batch_size,
            "eta": self.eta,
            "momentum": self.momentum,
            "l2": self.l2,
            "prox": self.prox,
            "loss_scaling": self.loss_scaling,
            "hidden": self.hidden,
            "sparsity": self.sparsity,
            "final_sparsity": self.final_sparsity,
            "readjustment_ratio": self.readjustment_ratio,
            "constant_rate": self.constant_rate,
            "rate_decay_end": self.rate_decay_end,
            "rounds_between_readjustments": self.rounds_between_readjustments,
            "pruning_begin": self.pruning_begin,
            "pruning_interval": self.pruning_interval,
            "min_votes": self.min_votes,
            "remember_old": self.remember_old,
            "fp16": self.fp16,
            "train_mode": self.train_mode.name(),
            "seed": self.seed,
        });
        json.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn base_config(kind: ExperimentKind) -> RunConfig {
        RunConfig {
            kind,
            dataset: DatasetKind::Mnist,
            partition: Partition::Iid,
            total_clients: 4,
            clients_per_round: 2,
            rounds: 2,
            epochs: 1,
            batch_size: 8,
            eta: 0.01,
            momentum: 0.9,
            l2: 0.001,
            prox: 0.0,
            loss_scaling: 1.0,
            hidden: vec![16],
            sparsity: 0.1,
            final_sparsity: 0.1,
            readjustment_ratio: 0.5,
            constant_rate: false,
            rate_decay_end: 1,
            rounds_between_readjustments: 1,
            pruning_begin: 0,
            pruning_interval: 1,
            sparsity_distribution: SparsityDistribution::Erk,
            pruning_type: PruningType::Hard,
            growth: GrowthPolicy::Gradient,
            min_votes: 0.0,
            remember_old: true,
            fp16: false,
            samples_per_client: 20,
            min_samples: 0,
            test_batches: 0,
            eval_every: 1,
            eval: true,
            seed: 42,
            outfile: None,
            initial_rounds: 0,
            retrain_rounds: 0,
            train_mode: TrainMode::Standard,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config(ExperimentKind::Dst).validate().is_ok());
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut cfg = base_config(ExperimentKind::Dst);
        cfg.rounds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sparsity_out_of_range_rejected() {
        let mut cfg = base_config(ExperimentKind::Dst);
        cfg.sparsity = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn describe_is_json() {
        let cfg = base_config(ExperimentKind::CoLearner);
        let v: serde_json::Value = serde_json::from_str(&cfg.describe()).unwrap();
        assert_eq!(v["experiment"], "ours");
        assert_eq!(v["dataset"], "mnist");
    }
}
