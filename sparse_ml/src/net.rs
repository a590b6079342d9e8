use ndarray::{Array1, Array2, ArrayView2, Zip};

use crate::error::{MlError, Result};
use crate::layer::MaskedDense;

/// How pruned weights are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningType {
    /// Pruned weights are set to zero.
    Hard,
    /// Only the mask bit is cleared; the weight value is retained.
    Soft,
}

/// A snapshot of every tensor in a network, masks included.
///
/// This is the unit exchanged between clients and the server: weights,
/// biases and boolean masks, per layer.
#[derive(Debug, Clone)]
pub struct NetState {
    pub weights: Vec<Array2<f32>>,
    pub biases: Vec<Array1<f32>>,
    pub masks: Vec<Array2<bool>>,
}

impl NetState {
    pub fn num_layers(&self) -> usize {
        self.weights.len()
    }
}

/// A prunable feedforward network: a stack of masked dense layers.
///
/// `forward` yields `(feature, logits)` where `feature` is the activation
/// entering the final layer, the input consumed by a co-learner head.
#[derive(Debug, Clone)]
pub struct PrunableNet {
    layers: Vec<MaskedDense>,
}

impl PrunableNet {
    pub fn new(layers: Vec<MaskedDense>) -> Result<Self> {
        if layers.is_empty() {
            return Err(MlError::InvalidInput("a network needs at least one layer"));
        }
        for pair in layers.windows(2) {
            if pair[0].fan_out() != pair[1].fan_in() {
                return Err(MlError::ShapeMismatch {
                    what: "layer fan-in",
                    got: pair[1].fan_in(),
                    expected: pair[0].fan_out(),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[MaskedDense] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [MaskedDense] {
        &mut self.layers
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].fan_in()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].fan_out()
    }

    /// Dimension of the feature fed to the final layer.
    pub fn feature_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].fan_in()
    }

    /// Number of maskable weights.
    pub fn mask_size(&self) -> usize {
        self.layers.iter().map(MaskedDense::mask_len).sum()
    }

    /// Bits needed to transmit every parameter at fp32.
    pub fn param_size_bits(&self) -> usize {
        self.layers.iter().map(MaskedDense::param_len).sum::<usize>() * 32
    }

    /// Forward pass over a batch; returns the penultimate activation and the
    /// output logits.
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        if x.ncols() != self.input_dim() {
            return Err(MlError::ShapeMismatch {
                what: "input",
                got: x.ncols(),
                expected: self.input_dim(),
            });
        }

        let n = self.layers.len();
        let mut a = x.to_owned();
        // for single-layer heads the feature is the input itself
        let mut feature = a.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            a = layer.forward(a.view());
            if i + 1 == n - 1 {
                feature = a.clone();
            }
        }
        Ok((feature, a))
    }

    /// Backpropagates an error signal, additionally injecting a gradient at
    /// the penultimate feature (the co-learner's contribution, scaled).
    pub fn backward_with_feature(
        &mut self,
        d: Array2<f32>,
        feature_grad: Option<(&Array2<f32>, f32)>,
    ) -> Result<()> {
        if d.ncols() != self.output_dim() {
            return Err(MlError::ShapeMismatch {
                what: "error signal",
                got: d.ncols(),
                expected: self.output_dim(),
            });
        }
        let n = self.layers.len();
        let mut d = d;
        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            d = layer.backward(d);
            if i + 1 == n {
                if let Some((fg, scale)) = feature_grad {
                    if fg.raw_dim() == d.raw_dim() {
                        d.zip_mut_with(fg, |d, &g| *d += scale * g);
                    }
                }
            }
        }
        Ok(())
    }

    /// Like `backward`, but returns the error signal with respect to the
    /// network's input (what a co-learner head passes back to the feature).
    pub fn backward_to_input(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        if d.ncols() != self.output_dim() {
            return Err(MlError::ShapeMismatch {
                what: "error signal",
                got: d.ncols(),
                expected: self.output_dim(),
            });
        }
        let mut d = d;
        for layer in self.layers.iter_mut().rev() {
            d = layer.backward(d);
        }
        Ok(d)
    }

    /// Adds the FedProx gradient `coeff * (w - w_global)` to every layer's
    /// gradient buffers.
    pub fn add_proximal_gradient(&mut self, global: &NetState, coeff: f32) -> Result<()> {
        self.check_state(global)?;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            Zip::from(&mut layer.grad_w)
                .and(&layer.weights)
                .and(&global.weights[i])
                .for_each(|g, &w, &gw| *g += coeff * (w - gw));
            Zip::from(&mut layer.grad_b)
                .and(&layer.bias)
                .and(&global.biases[i])
                .for_each(|g, &b, &gb| *g += coeff * (b - gb));
        }
        Ok(())
    }

    /// Zeroes gradient entries whose mask bit is off.
    pub fn apply_mask_to_gradients(&mut self) {
        for layer in &mut self.layers {
            layer.zero_masked_gradients();
        }
    }

    /// Backpropagates an error signal, filling each layer's gradient buffers.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<()> {
        if d.ncols() != self.output_dim() {
            return Err(MlError::ShapeMismatch {
                what: "error signal",
                got: d.ncols(),
                expected: self.output_dim(),
            });
        }
        let mut d = d;
        for layer in self.layers.iter_mut().rev() {
            d = layer.backward(d);
        }
        Ok(())
    }

    pub fn clear_gradients(&mut self) {
        for layer in &mut self.layers {
            layer.clear_gradients();
        }
    }

    /// Clones every tensor into a transferable snapshot.
    pub fn state(&self) -> NetState {
        NetState {
            weights: self.layers.iter().map(|l| l.weights.clone()).collect(),
            biases: self.layers.iter().map(|l| l.bias.clone()).collect(),
            masks: self.layers.iter().map(|l| l.mask.clone()).collect(),
        }
    }

    /// Overwrites every tensor from a snapshot.
    pub fn load_state(&mut self, state: &NetState) -> Result<()> {
        self.check_state(state)?;
        for (layer, i) in self.layers.iter_mut().zip(0..) {
            layer.weights.assign(&state.weights[i]);
            layer.bias.assign(&state.biases[i]);
            layer.mask.assign(&state.masks[i]);
        }
        Ok(())
    }

    /// Resets weights to a global state and applies a mask.
    ///
    /// With `global = None` only the local mask is re-imposed. With
    /// `use_global_mask` the local mask is replaced by the global one.
    /// Returns whether the local mask changed.
    pub fn reset_weights(
        &mut self,
        global: Option<&NetState>,
        use_global_mask: bool,
        pruning_type: PruningType,
    ) -> Result<bool> {
        if let Some(state) = global {
            self.check_state(state)?;
        }

        let mut mask_changed = false;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            match global {
                Some(state) => {
                    let apply_mask = if use_global_mask {
                        state.masks[i].clone()
                    } else {
                        layer.mask.clone()
                    };

                    // copy global weights where the applied mask permits
                    Zip::from(&mut layer.weights)
                        .and(&state.weights[i])
                        .and(&apply_mask)
                        .for_each(|w, &g, &m| {
                            if m {
                                *w = g;
                            } else if pruning_type == PruningType::Hard {
                                *w = 0.0;
                            }
                        });
                    layer.bias.assign(&state.biases[i]);

                    if use_global_mask {
                        if layer.mask != state.masks[i] {
                            mask_changed = true;
                        }
                        layer.mask.assign(&state.masks[i]);
                    }
                }
                None => {
                    if pruning_type == PruningType::Hard {
                        layer.zero_masked_weights();
                    }
                }
            }
        }
        Ok(mask_changed)
    }

    /// Re-imposes the local mask after an optimizer step.
    pub fn apply_local_mask(&mut self, pruning_type: PruningType) {
        if pruning_type == PruningType::Hard {
            for layer in &mut self.layers {
                layer.zero_masked_weights();
            }
        }
    }

    /// FedProx proximal term: squared distance to a global state over all
    /// weight and bias tensors.
    pub fn proximal_loss(&self, global: &NetState) -> Result<f32> {
        self.check_state(global)?;
        let mut loss = 0.0f32;
        for (i, layer) in self.layers.iter().enumerate() {
            loss += Zip::from(&layer.weights)
                .and(&global.weights[i])
                .fold(0.0, |acc, &w, &g| acc + (w - g) * (w - g));
            loss += Zip::from(&layer.bias)
                .and(&global.biases[i])
                .fold(0.0, |acc, &b, &g| acc + (b - g) * (b - g));
        }
        Ok(loss)
    }

    /// Global sparsity: fraction of mask bits that are off.
    pub fn sparsity(&self) -> f32 {
        let ones: usize = self
            .layers
            .iter()
            .map(|l| l.mask.iter().filter(|&&m| m).count())
            .sum();
        1.0 - ones as f32 / self.mask_size() as f32
    }

    fn check_state(&self, state: &NetState) -> Result<()> {
        if state.num_layers() != self.layers.len() {
            return Err(MlError::ShapeMismatch {
                what: "state layers",
                got: state.num_layers(),
                expected: self.layers.len(),
            });
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if state.weights[i].raw_dim() != layer.weights.raw_dim() {
                return Err(MlError::ShapeMismatch {
                    what: "state weights",
                    got: state.weights[i].len(),
                    expected: layer.weights.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Activation;
    use ndarray::array;

    fn two_layer() -> PrunableNet {
        let l1 = MaskedDense::new(
            array![[1.0, 0.0], [0.0, 1.0]],
            array![0.0, 0.0],
            Activation::Relu,
        );
        let l2 = MaskedDense::new(array![[1.0], [1.0]], array![0.0], Activation::Linear);
        PrunableNet::new(vec![l1, l2]).unwrap()
    }

    #[test]
    fn rejects_mismatched_layers() {
        let l1 = MaskedDense::new(array![[1.0, 0.0]], array![0.0, 0.0], Activation::Relu);
        let l2 = MaskedDense::new(array![[1.0], [1.0], [1.0]], array![0.0], Activation::Linear);
        assert!(PrunableNet::new(vec![l1, l2]).is_err());
    }

    #[test]
    fn forward_returns_feature_and_logits() {
        let mut net = two_layer();
        let (feature, logits) = net.forward(array![[2.0, 3.0]].view()).unwrap();
        assert_eq!(feature.ncols(), 2);
        assert!((feature[[0, 0]] - 2.0).abs() < 1e-6);
        assert!((logits[[0, 0]] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn reset_adopts_global_mask_and_reports_change() {
        let mut net = two_layer();
        let mut global = net.state();
        global.masks[0][[0, 0]] = false;
        global.weights[0][[0, 1]] = 7.0;

        let changed = net
            .reset_weights(Some(&global), true, PruningType::Hard)
            .unwrap();
        assert!(changed);
        assert_eq!(net.layers()[0].weights()[[0, 0]], 0.0);
        assert_eq!(net.layers()[0].weights()[[0, 1]], 7.0);

        // a second reset against the same state is a no-op on the mask
        let changed = net
            .reset_weights(Some(&global), true, PruningType::Hard)
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn soft_reset_keeps_masked_values() {
        let mut net = two_layer();
        let mut global = net.state();
        global.masks[0][[0, 0]] = false;

        net.reset_weights(Some(&global), true, PruningType::Soft)
            .unwrap();
        assert_eq!(net.layers()[0].weights()[[0, 0]], 1.0);
    }

    #[test]
    fn proximal_loss_is_zero_at_global() {
        let mut net = two_layer();
        let global = net.state();
        assert!(net.proximal_loss(&global).unwrap().abs() < 1e-9);

        net.layers_mut()[0].weights[[0, 0]] += 2.0;
        assert!((net.proximal_loss(&global).unwrap() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn sparsity_counts_mask_bits() {
        let mut net = two_layer();
        assert_eq!(net.sparsity(), 0.0);
        net.layers_mut()[0].mask[[0, 0]] = false;
        net.layers_mut()[1].mask[[1, 0]] = false;
        // 2 of 6 maskable weights off
        assert!((net.sparsity() - 2.0 / 6.0).abs() < 1e-6);
    }
}
