use ndarray::{Array1, Array2};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::Result;
use crate::layer::{Activation, MaskedDense};
use crate::net::PrunableNet;

/// He-normal initialized weight matrix.
fn init_weights<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Array2<f32> {
    let scale = (2.0 / fan_in as f32).sqrt();
    let w: Array2<f32> = Array2::random_using((fan_in, fan_out), StandardNormal, rng);
    w * scale
}

/// Builds a classifier: `input_dim -> hidden[0] -> ... -> num_classes`,
/// ReLU between layers, raw logits at the output, all-ones masks.
pub fn classifier<R: Rng + ?Sized>(
    input_dim: usize,
    hidden: &[usize],
    num_classes: usize,
    rng: &mut R,
) -> Result<PrunableNet> {
    let mut dims = Vec::with_capacity(hidden.len() + 2);
    dims.push(input_dim);
    dims.extend_from_slice(hidden);
    dims.push(num_classes);

    let mut layers = Vec::with_capacity(dims.len() - 1);
    for i in 0..dims.len() - 1 {
        let act = if i + 2 == dims.len() {
            Activation::Linear
        } else {
            Activation::Relu
        };
        layers.push(MaskedDense::new(
            init_weights(dims[i], dims[i + 1], rng),
            Array1::zeros(dims[i + 1]),
            act,
        ));
    }
    PrunableNet::new(layers)
}

/// Builds the co-learner head: a small network reading the main model's
/// penultimate feature and predicting the same classes.
pub fn co_learner<R: Rng + ?Sized>(
    feature_dim: usize,
    num_classes: usize,
    rng: &mut R,
) -> Result<PrunableNet> {
    classifier(feature_dim, &[feature_dim], num_classes, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn classifier_dimensions() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let net = classifier(784, &[300, 100], 10, &mut rng).unwrap();
        assert_eq!(net.num_layers(), 3);
        assert_eq!(net.input_dim(), 784);
        assert_eq!(net.feature_dim(), 100);
        assert_eq!(net.output_dim(), 10);
        assert_eq!(net.mask_size(), 784 * 300 + 300 * 100 + 100 * 10);
        assert_eq!(net.sparsity(), 0.0);
    }

    #[test]
    fn co_learner_matches_feature_dim() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let main = classifier(784, &[300, 100], 10, &mut rng).unwrap();
        let co = co_learner(main.feature_dim(), 10, &mut rng).unwrap();
        assert_eq!(co.input_dim(), 100);
        assert_eq!(co.output_dim(), 10);
    }

    #[test]
    fn init_is_seed_deterministic() {
        let mut a = ChaCha8Rng::seed_from_u64(7);
        let mut b = ChaCha8Rng::seed_from_u64(7);
        let n1 = classifier(10, &[5], 2, &mut a).unwrap();
        let n2 = classifier(10, &[5], 2, &mut b).unwrap();
        assert_eq!(n1.layers()[0].weights(), n2.layers()[0].weights());
    }
}
