use half::f16;
use log::debug;
use ndarray::{Array2, Zip};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use fed_data::{ClientData, DataLoader};
use sparse_ml::{argmax_rows, CrossEntropy, NetState, PrunableNet, PruningType, Sgd};

use crate::config::{ExperimentKind, RunConfig, TrainMode};
use crate::error::Result;

/// Per-round context handed to every sampled client.
pub struct RoundCtx<'a> {
    /// Server state at the start of the round.
    pub global: &'a NetState,
    /// Sparsity target the round regrows back to.
    pub sparsity: f32,
    /// Whether this round readjusts masks at all.
    pub readjust: bool,
    /// Fraction of kept weights cycled by a readjustment.
    pub readjustment_ratio: f32,
    pub pruning_type: PruningType,
    pub train_mode: TrainMode,
    /// Re-impose the mask on the dense weights after every step, even in
    /// modes that otherwise train dense.
    pub remask: bool,
}

/// What a client sends back to the server after local training.
pub struct Update {
    pub client_id: usize,
    pub state: NetState,
    pub train_size: usize,
    /// Bits received this round (global params, mask deltas).
    pub dl_bits: f64,
    /// Bits sent back (masked weights, readjusted masks).
    pub ul_bits: f64,
    pub mean_loss: f32,
    /// Last-batch weight gradients, collected for PruneFL readjustment.
    pub grads: Option<Vec<Array2<f32>>>,
}

/// Accuracy of the global model on one client's held-out data.
pub struct EvalResult {
    pub accuracy: f32,
    pub co_accuracy: Option<f32>,
}

/// A simulated client: local data, a local copy of the sparse net, and the
/// optional auxiliary nets the experiment family attaches.
pub struct Client {
    id: usize,
    data: ClientData,
    net: PrunableNet,
    /// Co-learner head reading the main net's penultimate feature.
    co_net: Option<PrunableNet>,
    /// Ensemble partner trained on the same batches with its own mask.
    twin: Option<PrunableNet>,
    rng: ChaCha8Rng,
    curr_epoch: usize,
    received_global: bool,
}

impl Client {
    pub fn new(id: usize, data: ClientData, net: PrunableNet, seed: u64) -> Self {
        // per-client stream so one client's draws never shift another's
        let rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(id as u64).wrapping_mul(0x9e37_79b9));
        Self {
            id,
            data,
            net,
            co_net: None,
            twin: None,
            rng,
            curr_epoch: 0,
            received_global: false,
        }
    }

    pub fn attach_co_learner(&mut self, co: PrunableNet) {
        self.co_net = Some(co);
    }

    pub fn attach_twin(&mut self, twin: PrunableNet) {
        self.twin = Some(twin);
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn train_size(&self) -> usize {
        self.data.train_size()
    }

    pub fn has_co_learner(&self) -> bool {
        self.co_net.is_some()
    }

    /// One round of local training against the current global state.
    pub fn train(&mut self, cfg: &RunConfig, ctx: &RoundCtx<'_>) -> Result<Update> {
        let mask_changed = self.net.reset_weights(Some(ctx.global), true, ctx.pruning_type)?;
        if let Some(twin) = self.twin.as_mut() {
            // the twin adopts global values under its own mask
            twin.reset_weights(Some(ctx.global), false, ctx.pruning_type)?;
        }

        let mask_bits = self.net.mask_size() as f64;
        let param_bits = self.net.param_size_bits() as f64;

        let mut dl_bits = 0.0;
        if mask_changed {
            dl_bits += mask_bits;
        }
        if !self.received_global {
            // the initial global model ships as a random seed, so the
            // parameters themselves cost nothing on first contact
            self.received_global = true;
        } else {
            let s = self.net.sparsity() as f64;
            dl_bits += (1.0 - s) * mask_bits * 32.0 + (param_bits - mask_bits * 32.0);
        }

        let mut opt = Sgd::new(&self.net, cfg.eta, cfg.momentum, cfg.l2);
        let mut co_opt = self
            .co_net
            .as_ref()
            .map(|co| Sgd::new(co, cfg.eta, cfg.momentum, cfg.l2));
        let mut twin_opt = self
            .twin
            .as_ref()
            .map(|t| Sgd::new(t, cfg.eta, cfg.momentum, cfg.l2));

        let ce = CrossEntropy::new();
        let mut ul_bits = 0.0;
        let mut loss_sum = 0.0f32;
        let mut n_batches = 0usize;
        // the co-learner head is never federated; its proximal anchor is
        // its own state at the start of the round
        let co_start = self.co_net.as_ref().map(PrunableNet::state);
        let mut last_batch: Option<(Array2<f32>, Vec<usize>)> = None;

        for _ in 0..cfg.epochs {
            self.data.train.shuffle(&mut self.rng);

            for batch in DataLoader::new(&self.data.train, cfg.batch_size) {
                self.net.clear_gradients();

                // dpf: the forward pass sees masked weights, the update
                // lands on the dense copy
                let dense = (ctx.train_mode == TrainMode::Dpf).then(|| self.net.state());
                if dense.is_some() {
                    self.net.apply_local_mask(PruningType::Hard);
                }

                let (feature, logits) = self.net.forward(batch.features)?;
                let mut loss = ce.loss(logits.view(), batch.labels);
                let d = ce.loss_prime(logits.view(), batch.labels);

                let mut feature_grad: Option<Array2<f32>> = None;
                if let Some(co) = self.co_net.as_mut() {
                    co.clear_gradients();
                    let (_, co_logits) = co.forward(feature.view())?;
                    loss += cfg.loss_scaling * ce.loss(co_logits.view(), batch.labels);
                    let co_d =
                        ce.loss_prime(co_logits.view(), batch.labels) * cfg.loss_scaling;
                    feature_grad = Some(co.backward_to_input(co_d)?);
                    if cfg.prox > 0.0 {
                        if let Some(anchor) = &co_start {
                            loss += cfg.loss_scaling * cfg.prox / 2.0
                                * co.proximal_loss(anchor)?;
                            co.add_proximal_gradient(anchor, cfg.prox * cfg.loss_scaling)?;
                        }
                    }
                }
                if cfg.prox > 0.0 {
                    loss += cfg.prox / 2.0 * self.net.proximal_loss(ctx.global)?;
                }

                self.net
                    .backward_with_feature(d, feature_grad.as_ref().map(|g| (g, 1.0)))?;
                if cfg.prox > 0.0 {
                    self.net.add_proximal_gradient(ctx.global, cfg.prox)?;
                }
                if ctx.train_mode == TrainMode::PartUse {
                    self.net.apply_mask_to_gradients();
                }
                if let Some(dense) = dense {
                    self.net.load_state(&dense)?;
                }
                opt.step(&mut self.net)?;
                match ctx.train_mode {
                    TrainMode::Standard | TrainMode::PartUse => {
                        self.net.apply_local_mask(ctx.pruning_type)
                    }
                    TrainMode::FullUse | TrainMode::Dpf => {
                        if ctx.remask {
                            self.net.apply_local_mask(ctx.pruning_type);
                        }
                    }
                }

                if let (Some(co), Some(co_opt)) = (self.co_net.as_mut(), co_opt.as_mut()) {
                    co_opt.step(co)?;
                }
                if let (Some(twin), Some(twin_opt)) = (self.twin.as_mut(), twin_opt.as_mut())
                {
                    twin.clear_gradients();
                    let (_, t_logits) = twin.forward(batch.features)?;
                    let t_d = ce.loss_prime(t_logits.view(), batch.labels);
                    twin.backward(t_d)?;
                    twin_opt.step(twin)?;
                    twin.apply_local_mask(ctx.pruning_type);
                }

                loss_sum += loss;
                n_batches += 1;
                last_batch = Some((batch.features.to_owned(), batch.labels.to_vec()));
            }

            // mask retrain readjusts once per window instead, after the
            // whole epoch loop
            let due = ctx.readjust
                && cfg.kind != ExperimentKind::MaskRetrain
                && self.curr_epoch >= cfg.pruning_begin
                && (self.curr_epoch - cfg.pruning_begin) % cfg.pruning_interval == 0;
            if due {
                ul_bits += self.readjust_masks(cfg, ctx, last_batch.as_ref())?;
            }
            self.curr_epoch += 1;
        }

        if ctx.readjust && cfg.kind == ExperimentKind::MaskRetrain {
            ul_bits += self.readjust_masks(cfg, ctx, last_batch.as_ref())?;
        }

        let grads = (cfg.kind == ExperimentKind::PruneFl)
            .then(|| self.net.layers().iter().map(|l| l.grad_w().clone()).collect());

        let mut state = match self.twin.as_ref() {
            Some(twin) => merge_pair(&self.net.state(), &twin.state(), 2.0),
            None => self.net.state(),
        };

        // the wire copy is always masked; dense local values stay put for
        // the next round
        for (w, m) in state.weights.iter_mut().zip(&state.masks) {
            Zip::from(w).and(m).for_each(|w, &m| {
                if !m {
                    *w = 0.0;
                }
            });
        }
        if cfg.fp16 {
            for w in &mut state.weights {
                w.mapv_inplace(|v| f16::from_f32(v).to_f32());
            }
            for b in &mut state.biases {
                b.mapv_inplace(|v| f16::from_f32(v).to_f32());
            }
        }

        let weight_bits = if cfg.fp16 { 16.0 } else { 32.0 };
        let up_sparsity = state_sparsity(&state) as f64;
        ul_bits += (1.0 - up_sparsity) * mask_bits * weight_bits + (param_bits - mask_bits * 32.0);

        let mean_loss = loss_sum / n_batches.max(1) as f32;
        debug!(client = self.id, loss = mean_loss as f64, upload_bits = ul_bits; "local round done");

        Ok(Update {
            client_id: self.id,
            state,
            train_size: self.data.train_size(),
            dl_bits,
            ul_bits,
            mean_loss,
            grads,
        })
    }

    /// Cycles `ratio` of the kept weights: prune past the round target,
    /// then regrow back to it. Returns the mask bits added to the upload.
    ///
    /// Training gradients carry prox, co-learner and mask contributions, so
    /// regrowth ranks fresh cross-entropy gradients recomputed on the last
    /// batch instead.
    fn readjust_masks(
        &mut self,
        cfg: &RunConfig,
        ctx: &RoundCtx<'_>,
        last_batch: Option<&(Array2<f32>, Vec<usize>)>,
    ) -> Result<f64> {
        let ce = CrossEntropy::new();
        let prune_target = ctx.sparsity + (1.0 - ctx.sparsity) * ctx.readjustment_ratio;

        if let Some((x, y)) = last_batch {
            self.net.clear_gradients();
            let (_, logits) = self.net.forward(x.view())?;
            self.net.backward(ce.loss_prime(logits.view(), y))?;
        }
        self.net
            .layer_prune(prune_target, cfg.sparsity_distribution, ctx.pruning_type)?;
        self.net
            .layer_grow(ctx.sparsity, cfg.sparsity_distribution, cfg.growth, &mut self.rng)?;

        if let Some(twin) = self.twin.as_mut() {
            if let Some((x, y)) = last_batch {
                twin.clear_gradients();
                let (_, logits) = twin.forward(x.view())?;
                twin.backward(ce.loss_prime(logits.view(), y))?;
            }
            twin.layer_prune(prune_target, cfg.sparsity_distribution, ctx.pruning_type)?;
            twin.layer_grow(ctx.sparsity, cfg.sparsity_distribution, cfg.growth, &mut self.rng)?;
        }

        Ok((1.0 - self.net.sparsity() as f64) * self.net.mask_size() as f64)
    }

    /// Evaluates a model on this client's held-out data, plus the local
    /// co-learner head when one is attached.
    pub fn evaluate(&mut self, model: &mut PrunableNet, cfg: &RunConfig) -> Result<EvalResult> {
        let mut correct = 0usize;
        let mut co_correct = 0usize;
        let mut total = 0usize;

        for (bi, batch) in DataLoader::new(&self.data.test, cfg.batch_size).enumerate() {
            if cfg.test_batches > 0 && bi >= cfg.test_batches {
                break;
            }
            let (feature, logits) = model.forward(batch.features)?;
            correct += hits(&logits, batch.labels);
            total += batch.len();

            if let Some(co) = self.co_net.as_mut() {
                let (_, co_logits) = co.forward(feature.view())?;
                co_correct += hits(&co_logits, batch.labels);
            }
        }

        let total = total.max(1) as f32;
        Ok(EvalResult {
            accuracy: correct as f32 / total,
            co_accuracy: self.co_net.as_ref().map(|_| co_correct as f32 / total),
        })
    }
}

fn hits(logits: &Array2<f32>, labels: &[usize]) -> usize {
    argmax_rows(logits.view())
        .iter()
        .zip(labels)
        .filter(|(p, y)| p == y)
        .count()
}

pub(crate) fn state_sparsity(state: &NetState) -> f32 {
    let total: usize = state.masks.iter().map(|m| m.len()).sum();
    let ones: usize = state
        .masks
        .iter()
        .map(|m| m.iter().filter(|&&b| b).count())
        .sum();
    1.0 - ones as f32 / total.max(1) as f32
}

/// Client-side analogue of server aggregation for the ensemble run: entries
/// both nets kept are averaged, everything else is dropped from the mask.
fn merge_pair(a: &NetState, b: &NetState, min_votes: f32) -> NetState {
    let mut weights = Vec::with_capacity(a.num_layers());
    let mut masks = Vec::with_capacity(a.num_layers());
    let mut biases = Vec::with_capacity(a.num_layers());

    for i in 0..a.num_layers() {
        let mut w = Array2::<f32>::zeros(a.weights[i].raw_dim());
        let mut m = Array2::<bool>::from_elem(a.masks[i].raw_dim(), false);

        Zip::from(&mut w)
            .and(&mut m)
            .and(&a.weights[i])
            .and(&a.masks[i])
            .and(&b.weights[i])
            .and(&b.masks[i])
            .for_each(|w, m, &wa, &ma, &wb, &mb| {
                let votes = ma as u8 as f32 + mb as u8 as f32;
                if votes >= min_votes && votes > 0.0 {
                    let sum = wa * (ma as u8 as f32) + wb * (mb as u8 as f32);
                    let avg = sum / votes;
                    *w = if avg.is_finite() { avg } else { 0.0 };
                    *m = true;
                }
            });

        weights.push(w);
        masks.push(m);
        biases.push((&a.biases[i] + &b.biases[i]) / 2.0);
    }

    NetState {
        weights,
        biases,
        masks,
    }
}
