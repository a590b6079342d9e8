use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::dataset::{DatasetKind, InMemoryDataset};
use crate::error::Result;

/// A seeded synthetic stand-in for one of the vision datasets.
///
/// Samples are class-conditional Gaussians in the dataset's native
/// dimensionality: each class owns a fixed mean vector drawn once from the
/// task seed, and samples add unit-variance noise. The same seed always
/// yields the same task, so experiment runs are reproducible without the
/// external dataset submodule the original repository pulled in.
#[derive(Debug, Clone)]
pub struct SyntheticTask {
    kind: DatasetKind,
    class_means: Vec<Array1<f32>>,
    noise_std: f32,
}

impl SyntheticTask {
    pub fn new(kind: DatasetKind, seed: u64) -> Self {
        // the task seed is separated from the run seed so that client
        // sampling and data generation do not share a stream
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5eed_da7a);
        let dim = kind.input_dim();

        let mut class_means = Vec::with_capacity(kind.num_classes());
        for _ in 0..kind.num_classes() {
            let mut mean = Array1::zeros(dim);
            for m in mean.iter_mut() {
                let v: f32 = StandardNormal.sample(&mut rng);
                *m = v;
            }
            class_means.push(mean);
        }

        Self {
            kind,
            class_means,
            noise_std: 1.0,
        }
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    /// Materializes a dataset with the given labels, one feature row each.
    pub fn make_dataset<R: Rng + ?Sized>(
        &self,
        labels: &[usize],
        rng: &mut R,
    ) -> Result<InMemoryDataset> {
        let dim = self.kind.input_dim();
        let mut features = Array2::zeros((labels.len(), dim));
        for (i, &label) in labels.iter().enumerate() {
            let mean = &self.class_means[label % self.class_means.len()];
            for (j, f) in features.row_mut(i).iter_mut().enumerate() {
                let noise: f32 = StandardNormal.sample(rng);
                *f = mean[j] + self.noise_std * noise;
            }
        }
        InMemoryDataset::new(features, labels.to_vec())
    }
}
