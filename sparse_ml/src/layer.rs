use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

/// Elementwise activation applied after a layer's affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    /// Identity; the output layer emits raw logits.
    Linear,
}

impl Activation {
    #[inline]
    fn f(self, z: f32) -> f32 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Linear => z,
        }
    }

    #[inline]
    fn df(self, z: f32) -> f32 {
        match self {
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
        }
    }
}

/// A fully connected layer with a boolean pruning mask over its weights.
///
/// Weights are stored `(fan_in, fan_out)` so a batch flows as `x · W + b`.
/// The bias is never masked; only `weights` participate in sparsity.
#[derive(Debug, Clone)]
pub struct MaskedDense {
    pub(crate) weights: Array2<f32>,
    pub(crate) bias: Array1<f32>,
    pub(crate) mask: Array2<bool>,
    act: Activation,

    // forward cache for backprop
    x: Array2<f32>,
    z: Array2<f32>,

    // gradient buffers, filled by `backward`
    pub(crate) grad_w: Array2<f32>,
    pub(crate) grad_b: Array1<f32>,
    has_grad: bool,
}

impl MaskedDense {
    /// Creates a layer from pre-initialized weights with an all-ones mask.
    pub fn new(weights: Array2<f32>, bias: Array1<f32>, act: Activation) -> Self {
        let dim = weights.raw_dim();
        let out = bias.len();
        Self {
            mask: Array2::from_elem(dim, true),
            grad_w: Array2::zeros(dim),
            grad_b: Array1::zeros(out),
            weights,
            bias,
            act,
            x: Array2::zeros((0, 0)),
            z: Array2::zeros((0, 0)),
            has_grad: false,
        }
    }

    pub fn fan_in(&self) -> usize {
        self.weights.nrows()
    }

    pub fn fan_out(&self) -> usize {
        self.weights.ncols()
    }

    /// Number of maskable weights in this layer.
    pub fn mask_len(&self) -> usize {
        self.mask.len()
    }

    /// Number of parameters (weights and biases).
    pub fn param_len(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn grad_w(&self) -> &Array2<f32> {
        &self.grad_w
    }

    pub(crate) fn has_grad(&self) -> bool {
        self.has_grad
    }

    /// Computes `act(x · W + b)`, caching what backprop needs.
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut z = x.dot(&self.weights);
        z += &self.bias;

        self.x = x.to_owned();
        let a = z.mapv(|v| self.act.f(v));
        self.z = z;
        a
    }

    /// Accumulates weight/bias gradients from the downstream error signal
    /// and returns the error signal for the upstream layer.
    pub fn backward(&mut self, mut d: Array2<f32>) -> Array2<f32> {
        Zip::from(&mut d)
            .and(&self.z)
            .for_each(|d, &z| *d *= self.act.df(z));

        self.grad_w = self.x.t().dot(&d);
        self.grad_b = d.sum_axis(Axis(0));
        self.has_grad = true;

        d.dot(&self.weights.t())
    }

    /// Drops cached activations and gradients.
    pub fn clear_gradients(&mut self) {
        self.grad_w.fill(0.0);
        self.grad_b.fill(0.0);
        self.x = Array2::zeros((0, 0));
        self.z = Array2::zeros((0, 0));
        self.has_grad = false;
    }

    /// Zeroes every weight whose mask bit is off.
    pub fn zero_masked_weights(&mut self) {
        Zip::from(&mut self.weights).and(&self.mask).for_each(|w, &m| {
            if !m {
                *w = 0.0;
            }
        });
    }

    /// Zeroes every gradient entry whose mask bit is off.
    pub fn zero_masked_gradients(&mut self) {
        Zip::from(&mut self.grad_w).and(&self.mask).for_each(|g, &m| {
            if !m {
                *g = 0.0;
            }
        });
    }

    /// Fraction of mask bits that are off.
    pub fn sparsity(&self) -> f32 {
        let ones = self.mask.iter().filter(|&&m| m).count();
        1.0 - ones as f32 / self.mask.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn layer() -> MaskedDense {
        MaskedDense::new(
            array![[1.0, -2.0], [0.5, 3.0]],
            array![0.1, -0.1],
            Activation::Linear,
        )
    }

    #[test]
    fn forward_affine() {
        let mut l = layer();
        let y = l.forward(array![[1.0, 1.0]].view());
        assert!((y[[0, 0]] - 1.6).abs() < 1e-6);
        assert!((y[[0, 1]] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn backward_gradients() {
        let mut l = layer();
        let _ = l.forward(array![[1.0, 2.0]].view());
        let up = l.backward(array![[1.0, 0.0]]);

        // dW = x^T d, db = d, upstream = d W^T
        assert!((l.grad_w()[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((l.grad_w()[[1, 0]] - 2.0).abs() < 1e-6);
        assert!((l.grad_b[0] - 1.0).abs() < 1e-6);
        assert!((up[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((up[[0, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn relu_blocks_negative_gradient() {
        let mut l = MaskedDense::new(array![[1.0]], array![-2.0], Activation::Relu);
        let y = l.forward(array![[1.0]].view());
        assert_eq!(y[[0, 0]], 0.0);

        let up = l.backward(array![[1.0]]);
        assert_eq!(l.grad_w()[[0, 0]], 0.0);
        assert_eq!(up[[0, 0]], 0.0);
    }

    #[test]
    fn masked_weights_are_zeroed() {
        let mut l = layer();
        l.mask[[0, 1]] = false;
        l.zero_masked_weights();
        assert_eq!(l.weights()[[0, 1]], 0.0);
        assert_eq!(l.weights()[[0, 0]], 1.0);
        assert!((l.sparsity() - 0.25).abs() < 1e-6);
    }
}
