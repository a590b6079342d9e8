use std::time::Instant;

use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use fed_data::{build_clients, SyntheticTask};
use sparse_ml::{models, schedule, PrunableNet, PruningType};

use crate::client::{state_sparsity, Client, RoundCtx, Update};
use crate::config::{default_hidden, ExperimentKind, RunConfig, TrainMode};
use crate::error::Result;
use crate::metrics::{ClientRow, EvalPoint, History, OutputWriter, RunSummary, Stats};
use crate::sampling::sample_clients;
use crate::server;

/// Everything one round of training is parameterized by.
struct RoundPlan {
    /// Sparsity the round regrows back to.
    target: f32,
    /// Annealed fraction of kept weights a readjustment cycles.
    ratio: f32,
    readjust: bool,
    pruning_type: PruningType,
    train_mode: TrainMode,
    /// Re-impose the mask after every step even in dense train modes.
    remask: bool,
}

/// Readjustment ratio in effect for a round. The annealed schedule decays
/// the configured ratio by a cosine factor that itself starts at the ratio,
/// so the effective value opens at `ratio^2`.
fn effective_ratio(cfg: &RunConfig, round: usize) -> f32 {
    if cfg.constant_rate {
        cfg.readjustment_ratio
    } else {
        cfg.readjustment_ratio
            * schedule::cosine_decay(round, cfg.readjustment_ratio, cfg.rate_decay_end)
    }
}

/// Phase schedule for the mask-retrain experiment. Each readjustment window
/// opens with `pruning_begin` rounds in the configured train mode, readjusts
/// on the last of those, then retrains the rest of the window in dpf mode
/// with the mask re-imposed after every step.
fn mask_retrain_plan(cfg: &RunConfig, round: usize, target: f32, ratio: f32) -> RoundPlan {
    let window = cfg.rounds_between_readjustments.max(1);
    let offset = (round - 1) % window;
    if offset < cfg.pruning_begin {
        RoundPlan {
            target,
            ratio,
            readjust: ratio > 0.0 && offset + 1 == cfg.pruning_begin,
            pruning_type: cfg.pruning_type,
            train_mode: cfg.train_mode,
            remask: false,
        }
    } else {
        RoundPlan {
            target,
            ratio,
            readjust: false,
            pruning_type: cfg.pruning_type,
            train_mode: TrainMode::Dpf,
            remask: true,
        }
    }
}

/// A fully built experiment: partitioned clients, the server model, and the
/// round loop that drives them.
pub struct Experiment {
    cfg: RunConfig,
    clients: Vec<Client>,
    global: PrunableNet,
    rng: ChaCha8Rng,
    /// Traffic since the last evaluation report.
    dl_window: f64,
    ul_window: f64,
    /// Traffic over the whole run.
    dl_total: f64,
    ul_total: f64,
}

impl Experiment {
    /// Builds the task, partitions clients, and initializes the global model
    /// with its starting mask.
    pub fn new(mut cfg: RunConfig) -> Result<Self> {
        cfg.validate()?;
        if cfg.hidden.is_empty() {
            cfg.hidden = default_hidden(cfg.dataset);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let task = SyntheticTask::new(cfg.dataset, cfg.seed);
        let data = build_clients(
            &task,
            cfg.partition,
            cfg.total_clients,
            cfg.samples_per_client,
            cfg.min_samples,
            &mut rng,
        )?;

        let input_dim = cfg.dataset.input_dim();
        let classes = cfg.dataset.num_classes();

        let mut global = models::classifier(input_dim, &cfg.hidden, classes, &mut rng)?;
        if cfg.sparsity > 0.0 {
            // magnitude pruning of the fresh init yields the starting mask
            global.layer_prune(cfg.sparsity, cfg.sparsity_distribution, cfg.pruning_type)?;
        }

        let mut clients = Vec::with_capacity(data.len());
        for d in data {
            let id = d.id;
            let net = models::classifier(input_dim, &cfg.hidden, classes, &mut rng)?;
            let mut client = Client::new(id, d, net, cfg.seed);
            match cfg.kind {
                ExperimentKind::CoLearner | ExperimentKind::RandomMask => {
                    client.attach_co_learner(models::co_learner(
                        global.feature_dim(),
                        classes,
                        &mut rng,
                    )?);
                }
                ExperimentKind::Ensemble => {
                    let mut twin = models::classifier(input_dim, &cfg.hidden, classes, &mut rng)?;
                    if cfg.sparsity > 0.0 {
                        twin.layer_prune(cfg.sparsity, cfg.sparsity_distribution, cfg.pruning_type)?;
                    }
                    client.attach_twin(twin);
                }
                _ => {}
            }
            clients.push(client);
        }

        info!(
            experiment = cfg.kind.name(),
            clients = clients.len(),
            sparsity = cfg.sparsity as f64;
            "experiment built"
        );

        Ok(Self {
            cfg,
            clients,
            global,
            rng,
            dl_window: 0.0,
            ul_window: 0.0,
            dl_total: 0.0,
            ul_total: 0.0,
        })
    }

    pub fn global_sparsity(&self) -> f32 {
        self.global.sparsity()
    }

    /// Drives the full run and returns the closing summary.
    pub fn run(&mut self, out: &mut OutputWriter) -> Result<RunSummary> {
        out.line(&self.cfg.describe())?;
        out.line(ClientRow::HEADER)?;

        if self.cfg.kind == ExperimentKind::PruneFl && self.cfg.initial_rounds > 0 {
            self.prunefl_initial()?;
        }

        let retrain_rounds = if self.cfg.kind == ExperimentKind::HardRetrain {
            self.cfg.retrain_rounds
        } else {
            0
        };
        let total_rounds = self.cfg.rounds + retrain_rounds;
        let bar = ProgressBar::new(total_rounds as u64);
        let mut history = History::default();

        for round in 1..=self.cfg.rounds {
            let ratio = effective_ratio(&self.cfg, round);
            let target = schedule::round_sparsity(
                round,
                self.cfg.sparsity,
                self.cfg.final_sparsity,
                self.cfg.rate_decay_end,
            );
            let on_schedule = self.cfg.rounds_between_readjustments > 0
                && (round - 1) % self.cfg.rounds_between_readjustments == 0;

            let plan = if self.cfg.kind == ExperimentKind::MaskRetrain {
                mask_retrain_plan(&self.cfg, round, target, ratio)
            } else {
                RoundPlan {
                    target,
                    ratio,
                    readjust: self.cfg.kind.clients_readjust() && ratio > 0.0 && on_schedule,
                    pruning_type: self.cfg.pruning_type,
                    train_mode: self.cfg.train_mode,
                    remask: false,
                }
            };
            let updates = self.run_round(round, &plan, out)?;

            if self.cfg.kind == ExperimentKind::PruneFl && on_schedule {
                self.prunefl_server_readjust(&updates)?;
            }

            if self.cfg.eval && self.cfg.eval_every > 0 && round % self.cfg.eval_every == 0 {
                self.report(round, &mut history, out)?;
            }
            bar.inc(1);
        }

        // frozen mask, hard pruning, no readjustment
        for extra in 1..=retrain_rounds {
            let round = self.cfg.rounds + extra;
            let plan = RoundPlan {
                target: self.cfg.final_sparsity,
                ratio: 0.0,
                readjust: false,
                pruning_type: PruningType::Hard,
                train_mode: TrainMode::Standard,
                remask: false,
            };
            self.run_round(round, &plan, out)?;
            if self.cfg.eval && self.cfg.eval_every > 0 && round % self.cfg.eval_every == 0 {
                self.report(round, &mut history, out)?;
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        let (accs, cos) = self.evaluate_all()?;
        let summary = RunSummary {
            rounds: total_rounds,
            accuracy: Stats::from_values(&accs),
            co_accuracy: (!cos.is_empty()).then(|| Stats::from_values(&cos)),
            sparsity: self.global.sparsity(),
            dl_bits: self.dl_total,
            ul_bits: self.ul_total,
        };
        summary.write(out)?;

        if let Some(outfile) = &self.cfg.outfile {
            history.write_csv(&History::path_for(outfile))?;
        }
        Ok(summary)
    }

    /// One federated round: sample, train, aggregate, reprune.
    fn run_round(
        &mut self,
        round: usize,
        plan: &RoundPlan,
        out: &mut OutputWriter,
    ) -> Result<Vec<Update>> {
        let global_state = self.global.state();
        let ctx = RoundCtx {
            global: &global_state,
            sparsity: plan.target,
            readjust: plan.readjust,
            readjustment_ratio: plan.ratio,
            pruning_type: plan.pruning_type,
            train_mode: plan.train_mode,
            remask: plan.remask,
        };

        let picks = sample_clients(&mut self.rng, self.clients.len(), self.cfg.clients_per_round);
        let mut updates = Vec::with_capacity(picks.len());
        for ci in picks {
            let t0 = Instant::now();
            let u = self.clients[ci].train(&self.cfg, &ctx)?;
            self.dl_window += u.dl_bits;
            self.ul_window += u.ul_bits;
            self.dl_total += u.dl_bits;
            self.ul_total += u.ul_bits;

            let row = ClientRow {
                round,
                client_id: u.client_id,
                train_size: u.train_size,
                dl_bits: u.dl_bits,
                ul_bits: u.ul_bits,
                compute_ms: t0.elapsed().as_millis(),
                loss: u.mean_loss,
                sparsity: state_sparsity(&u.state),
            };
            out.line(&row.csv())?;
            updates.push(u);
        }

        let agg = server::aggregate(
            &global_state,
            &updates,
            self.cfg.min_votes,
            self.cfg.remember_old,
        )?;

        // the backfilled average decides the next mask; reprune it when the
        // merged model came out denser than the round target
        self.global.load_state(&agg.mask_params)?;
        if self.global.sparsity() < plan.target {
            self.global
                .layer_prune(plan.target, self.cfg.sparsity_distribution, plan.pruning_type)?;
        }

        let masks: Vec<_> = self.global.layers().iter().map(|l| l.mask().clone()).collect();
        let mut merged = agg.params;
        server::impose_masks(&mut merged, &masks);
        self.global.load_state(&merged)?;

        Ok(updates)
    }

    /// PruneFL warmup: one volunteer client trains and the mask is rebuilt
    /// from its gradients until federation starts.
    fn prunefl_initial(&mut self) -> Result<()> {
        let times = self.layer_times();
        for _ in 0..self.cfg.initial_rounds {
            let global_state = self.global.state();
            let ctx = RoundCtx {
                global: &global_state,
                sparsity: self.cfg.sparsity,
                readjust: false,
                readjustment_ratio: 0.0,
                pruning_type: self.cfg.pruning_type,
                train_mode: TrainMode::Standard,
                remask: false,
            };
            let u = self.clients[0].train(&self.cfg, &ctx)?;
            self.dl_window += u.dl_bits;
            self.ul_window += u.ul_bits;
            self.dl_total += u.dl_bits;
            self.ul_total += u.ul_bits;

            self.global.load_state(&u.state)?;
            if let Some(grads) = &u.grads {
                let changed = self
                    .global
                    .prunefl_readjust(grads, &times, self.cfg.sparsity)?;
                self.global.apply_local_mask(self.cfg.pruning_type);
                debug!(changed = changed as f64; "prunefl warmup readjustment");
            }
        }
        Ok(())
    }

    /// PruneFL federation-phase readjustment from aggregated gradients.
    fn prunefl_server_readjust(&mut self, updates: &[Update]) -> Result<()> {
        let mut agg: Vec<Array2<f32>> = self
            .global
            .layers()
            .iter()
            .map(|l| Array2::zeros(l.weights().raw_dim()))
            .collect();
        let mut any = false;
        for u in updates {
            if let Some(grads) = &u.grads {
                any = true;
                for (a, g) in agg.iter_mut().zip(grads) {
                    a.scaled_add(u.train_size as f32, g);
                }
            }
        }
        if !any {
            return Ok(());
        }

        let times = self.layer_times();
        let changed = self.global.prunefl_readjust(&agg, &times, self.cfg.sparsity)?;
        self.global.apply_local_mask(self.cfg.pruning_type);

        // readjustment rounds upload dense gradients
        let grad_bits = updates.len() as f64 * self.global.param_size_bits() as f64;
        self.ul_window += grad_bits;
        self.ul_total += grad_bits;

        debug!(changed = changed as f64; "prunefl server readjustment");
        Ok(())
    }

    /// Evaluates the global model on every client's held-out data.
    fn evaluate_all(&mut self) -> Result<(Vec<f32>, Vec<f32>)> {
        let mut scratch = self.global.clone();
        let mut accs = Vec::with_capacity(self.clients.len());
        let mut cos = Vec::new();
        for client in &mut self.clients {
            let r = client.evaluate(&mut scratch, &self.cfg)?;
            accs.push(r.accuracy);
            if let Some(a) = r.co_accuracy {
                cos.push(a);
            }
        }
        Ok((accs, cos))
    }

    fn report(&mut self, round: usize, history: &mut History, out: &mut OutputWriter) -> Result<()> {
        let (accs, cos) = self.evaluate_all()?;
        let acc = Stats::from_values(&accs);
        let co = (!cos.is_empty()).then(|| Stats::from_values(&cos));
        let sparsity = self.global.sparsity();

        let mut line = format!(
            "round {round}: accuracy {:.4} (std {:.4}), sparsity {:.4}, dl {:.0} ul {:.0}",
            acc.mean, acc.std, sparsity, self.dl_window, self.ul_window
        );
        if let Some(co) = &co {
            line.push_str(&format!(", co-accuracy {:.4}", co.mean));
        }
        out.line(&line)?;

        history.push(EvalPoint {
            round,
            accuracy: acc.mean,
            co_accuracy: co.map(|s| s.mean),
            dl_bits: self.dl_window,
            ul_bits: self.ul_window,
            sparsity,
        });
        // the traffic window restarts at every report
        self.dl_window = 0.0;
        self.ul_window = 0.0;
        Ok(())
    }

    /// Relative per-layer time estimates for PruneFL, proportional to each
    /// layer's parameter count.
    fn layer_times(&self) -> Vec<f32> {
        let total: f32 = self
            .global
            .layers()
            .iter()
            .map(|l| l.param_len() as f32)
            .sum();
        self.global
            .layers()
            .iter()
            .map(|l| l.param_len() as f32 / total)
            .collect()
    }
}
