use log::debug;
use ndarray::Array2;
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::error::{MlError, Result};
use crate::net::{PrunableNet, PruningType};

/// How kept-weight budgets are spread across layers.
///
/// `Er` and `Erk` follow Erdos-Renyi scaling, density per layer proportional
/// to `(fan_in + fan_out) / (fan_in * fan_out)`; for dense layers the kernel
/// correction of ERK is the identity, so the two coincide here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparsityDistribution {
    Uniform,
    Er,
    Erk,
}

/// How pruned-out weights are selected for regrowth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthPolicy {
    /// Regrow the entries with the largest gradient magnitude.
    Gradient,
    /// Regrow uniformly at random (the RandomMask ablation).
    Random,
}

/// Indices of the `k` smallest (or largest) values.
fn select_indices(values: &[f32], k: usize, largest: bool) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    let k = k.min(values.len());
    if k == 0 {
        return Vec::new();
    }
    if largest {
        idx.sort_unstable_by(|&a, &b| values[b].total_cmp(&values[a]));
    } else {
        idx.sort_unstable_by(|&a, &b| values[a].total_cmp(&values[b]));
    }
    idx.truncate(k);
    idx
}

impl PrunableNet {
    /// Kept-weight budget per layer for a target global sparsity.
    ///
    /// Budgets are renormalized so the weighted sum of layer sparsities
    /// matches the target, then floored per layer.
    pub fn weights_by_layer(
        &self,
        sparsity: f32,
        distribution: SparsityDistribution,
    ) -> Result<Vec<usize>> {
        if !(0.0..=1.0).contains(&sparsity) {
            return Err(MlError::InvalidInput("sparsity must lie in [0, 1]"));
        }

        let n_weights: Vec<f32> = self.layers().iter().map(|l| l.mask_len() as f32).collect();
        let mut sparsities: Vec<f32> = self
            .layers()
            .iter()
            .map(|l| match distribution {
                SparsityDistribution::Uniform => sparsity,
                SparsityDistribution::Er | SparsityDistribution::Erk => {
                    let fan_in = l.fan_in() as f32;
                    let fan_out = l.fan_out() as f32;
                    1.0 - (fan_in + fan_out) / (fan_in * fan_out)
                }
            })
            .collect();

        if distribution != SparsityDistribution::Uniform {
            let total: f32 = n_weights.iter().sum();
            let weighted: f32 = sparsities
                .iter()
                .zip(&n_weights)
                .map(|(s, n)| s * n)
                .sum();
            let scale = sparsity * total / weighted;
            for s in &mut sparsities {
                *s *= scale;
            }
        }

        Ok(sparsities
            .iter()
            .zip(&n_weights)
            .map(|(s, n)| (((1.0 - s) * n).floor().max(0.0)) as usize)
            .collect())
    }

    /// Magnitude-prunes each layer down to its budget for the target
    /// sparsity. Layers already at or below budget are left alone, as are
    /// layers whose budget came out zero.
    pub fn layer_prune(
        &mut self,
        sparsity: f32,
        distribution: SparsityDistribution,
        pruning_type: PruningType,
    ) -> Result<()> {
        let budgets = self.weights_by_layer(sparsity, distribution)?;
        for (layer, budget) in self.layers_mut().iter_mut().zip(budgets) {
            let n_total = layer.mask_len();
            if budget == 0 || budget >= n_total {
                continue;
            }
            let n_prune = n_total - budget;

            let magnitudes: Vec<f32> = layer.weights.iter().map(|w| w.abs()).collect();
            let prune_idx = select_indices(&magnitudes, n_prune, false);

            let shape = layer.weights.raw_dim();
            for flat in prune_idx {
                let (r, c) = (flat / shape[1], flat % shape[1]);
                if pruning_type == PruningType::Hard {
                    layer.weights[[r, c]] = 0.0;
                }
                layer.mask[[r, c]] = false;
            }
        }
        Ok(())
    }

    /// Regrows each layer up to its budget for the target sparsity.
    ///
    /// The gradient policy picks the largest-|grad| entries; regrown weights
    /// restart at zero with their mask bit set.
    pub fn layer_grow<R: Rng + ?Sized>(
        &mut self,
        sparsity: f32,
        distribution: SparsityDistribution,
        policy: GrowthPolicy,
        rng: &mut R,
    ) -> Result<()> {
        let budgets = self.weights_by_layer(sparsity, distribution)?;
        for (layer, budget) in self.layers_mut().iter_mut().zip(budgets) {
            let n_nonzero = layer.mask.iter().filter(|&&m| m).count();
            if budget <= n_nonzero {
                continue;
            }
            let n_grow = budget - n_nonzero;

            let shape = layer.weights.raw_dim();
            let candidates: Vec<usize> = layer
                .mask
                .iter()
                .enumerate()
                .filter(|(_, &m)| !m)
                .map(|(i, _)| i)
                .collect();

            let grow_idx = match policy {
                GrowthPolicy::Gradient => {
                    if !layer.has_grad() {
                        return Err(MlError::MissingGradients);
                    }
                    let grads: Vec<f32> = layer.grad_w.iter().map(|g| g.abs()).collect();
                    let magnitudes: Vec<f32> =
                        candidates.iter().map(|&i| grads[i]).collect();
                    select_indices(&magnitudes, n_grow, true)
                        .into_iter()
                        .map(|i| candidates[i])
                        .collect()
                }
                GrowthPolicy::Random => candidates.into_iter().choose_multiple(rng, n_grow),
            };

            for flat in grow_idx {
                let (r, c) = (flat / shape[1], flat % shape[1]);
                layer.weights[[r, c]] = 0.0;
                layer.mask[[r, c]] = true;
            }
        }
        Ok(())
    }

    /// PruneFL mask readjustment from server-side aggregate gradients.
    ///
    /// Entry importance is `g^2 / t` for its layer's time estimate `t`.
    /// Entries are admitted in order of decreasing squared gradient while
    /// the marginal importance stays above the running `delta / t` bar, or
    /// until `(1 - prunable_params)` of the weights are kept. Returns the
    /// fraction of mask bits that changed.
    pub fn prunefl_readjust(
        &mut self,
        aggregate_grads: &[Array2<f32>],
        layer_times: &[f32],
        prunable_params: f32,
    ) -> Result<f32> {
        if aggregate_grads.len() != self.num_layers() || layer_times.len() != self.num_layers() {
            return Err(MlError::ShapeMismatch {
                what: "aggregate gradients",
                got: aggregate_grads.len(),
                expected: self.num_layers(),
            });
        }

        let squared: Vec<Vec<f32>> = aggregate_grads
            .iter()
            .map(|g| g.iter().map(|v| v * v).collect())
            .collect();
        let importances: Vec<Vec<f32>> = squared
            .iter()
            .zip(layer_times)
            .map(|(g2, &t)| g2.iter().map(|v| v / t).collect())
            .collect();

        let offsets: Vec<usize> = squared
            .iter()
            .scan(0usize, |acc, g2| {
                let start = *acc;
                *acc += g2.len();
                Some(start)
            })
            .collect();
        let total: usize = squared.iter().map(Vec::len).sum();

        let cat_grad: Vec<f32> = squared.iter().flatten().copied().collect();
        let order = select_indices(&cat_grad, total, true);
        let n_required = ((1.0 - prunable_params) * total as f32) as usize;

        let mut masks: Vec<Array2<bool>> = aggregate_grads
            .iter()
            .map(|g| Array2::from_elem(g.raw_dim(), false))
            .collect();

        let mut t = 0.2f32;
        let mut delta = 0.0f32;
        let mut n_grown = 0usize;

        for global_idx in order {
            let layer = match offsets.binary_search(&global_idx) {
                Ok(l) => l,
                Err(l) => l - 1,
            };
            let within = global_idx - offsets[layer];

            if importances[layer][within] >= delta / t || n_grown <= n_required {
                delta += cat_grad[global_idx];
                t += layer_times[layer];

                let cols = masks[layer].ncols();
                masks[layer][[within / cols, within % cols]] = true;
                n_grown += 1;
            } else {
                break;
            }
        }

        debug!(density = n_grown as f64 / total as f64; "prunefl readjustment");

        let mut n_differences = 0usize;
        for (layer, mask) in self.layers_mut().iter_mut().zip(&masks) {
            n_differences += layer
                .mask
                .iter()
                .zip(mask.iter())
                .filter(|(a, b)| a != b)
                .count();
            layer.mask.assign(mask);
        }

        Ok(n_differences as f32 / total as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Activation, MaskedDense};
    use ndarray::{array, Array1};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn net_4x4() -> PrunableNet {
        // 16 + 4 maskable weights across two layers
        let w1 = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32 + 1.0);
        let l1 = MaskedDense::new(w1, Array1::zeros(4), Activation::Relu);
        let l2 = MaskedDense::new(
            array![[0.1], [0.2], [0.3], [0.4]],
            Array1::zeros(1),
            Activation::Linear,
        );
        PrunableNet::new(vec![l1, l2]).unwrap()
    }

    #[test]
    fn uniform_budgets_match_target() {
        let net = net_4x4();
        let budgets = net
            .weights_by_layer(0.5, SparsityDistribution::Uniform)
            .unwrap();
        assert_eq!(budgets, vec![8, 2]);
    }

    #[test]
    fn erk_budgets_hit_global_sparsity() {
        let net = net_4x4();
        let budgets = net
            .weights_by_layer(0.5, SparsityDistribution::Erk)
            .unwrap();
        let kept: usize = budgets.iter().sum();
        // flooring may keep slightly fewer, never more
        assert!(kept <= 10);
        assert!(kept >= 8);
    }

    #[test]
    fn prune_reaches_target_sparsity() {
        let mut net = net_4x4();
        net.layer_prune(0.5, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();
        assert!((net.sparsity() - 0.5).abs() < 1e-6);

        // hard pruning zeroes the masked-out weights
        for layer in net.layers() {
            for (w, m) in layer.weights().iter().zip(layer.mask().iter()) {
                if !m {
                    assert_eq!(*w, 0.0);
                }
            }
        }
    }

    #[test]
    fn full_sparsity_skips_instead_of_emptying() {
        let mut net = net_4x4();
        net.layer_prune(1.0, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();
        // a zero kept-weight budget leaves the layer alone
        assert!(net.sparsity() < 1e-6, "net was emptied: {}", net.sparsity());
    }

    #[test]
    fn prune_keeps_largest_magnitudes() {
        let mut net = net_4x4();
        net.layer_prune(0.5, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();
        // layer 1 weights were 1..=16; the 8 largest survive
        let l = &net.layers()[0];
        for (w, m) in l.weights().iter().zip(l.mask().iter()) {
            if *m {
                assert!(*w >= 9.0);
            }
        }
    }

    #[test]
    fn soft_prune_keeps_weight_values() {
        let mut net = net_4x4();
        net.layer_prune(0.5, SparsityDistribution::Uniform, PruningType::Soft)
            .unwrap();
        assert!((net.sparsity() - 0.5).abs() < 1e-6);
        let l = &net.layers()[0];
        let zeros = l.weights().iter().filter(|&&w| w == 0.0).count();
        assert_eq!(zeros, 0);
    }

    #[test]
    fn gradient_growth_restores_density() {
        let mut net = net_4x4();
        net.layer_prune(0.75, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();

        // fabricate gradients via a backward pass
        let x = Array2::ones((1, 4));
        let _ = net.forward(x.view()).unwrap();
        net.backward(array![[1.0]]).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        net.layer_grow(
            0.5,
            SparsityDistribution::Uniform,
            GrowthPolicy::Gradient,
            &mut rng,
        )
        .unwrap();
        assert!((net.sparsity() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gradient_growth_without_gradients_errors() {
        let mut net = net_4x4();
        net.layer_prune(0.75, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();
        net.clear_gradients();

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = net.layer_grow(
            0.25,
            SparsityDistribution::Uniform,
            GrowthPolicy::Gradient,
            &mut rng,
        );
        assert!(err.is_err());
    }

    #[test]
    fn random_growth_restores_density() {
        let mut net = net_4x4();
        net.layer_prune(0.75, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        net.layer_grow(
            0.25,
            SparsityDistribution::Uniform,
            GrowthPolicy::Random,
            &mut rng,
        )
        .unwrap();
        assert!((net.sparsity() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn grow_never_shrinks() {
        let mut net = net_4x4();
        net.layer_prune(0.25, SparsityDistribution::Uniform, PruningType::Hard)
            .unwrap();
        let before = net.sparsity();

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // asking for a *higher* sparsity than current must be a no-op
        net.layer_grow(
            0.75,
            SparsityDistribution::Uniform,
            GrowthPolicy::Random,
            &mut rng,
        )
        .unwrap();
        assert_eq!(net.sparsity(), before);
    }

    #[test]
    fn prunefl_readjust_prefers_large_gradients() {
        let mut net = net_4x4();
        let g1 = Array2::from_shape_fn((4, 4), |(r, c)| if r == 0 { 10.0 } else { 0.01 * c as f32 });
        let g2 = array![[5.0], [0.0], [0.0], [0.0]];
        let times = vec![1.0, 1.0];

        let changed = net.prunefl_readjust(&[g1, g2], &times, 0.7).unwrap();
        assert!(changed > 0.0);

        // the large-gradient row survives
        let l = &net.layers()[0];
        for c in 0..4 {
            assert!(l.mask()[[0, c]]);
        }
    }
}
