use ndarray::{Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{DataError, Result};

/// The simulated dataset families, with their native dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Mnist,
    Emnist,
    Cifar10,
    Cifar100,
}

impl DatasetKind {
    pub fn input_dim(self) -> usize {
        match self {
            DatasetKind::Mnist | DatasetKind::Emnist => 28 * 28,
            DatasetKind::Cifar10 | DatasetKind::Cifar100 => 3 * 32 * 32,
        }
    }

    pub fn num_classes(self) -> usize {
        match self {
            DatasetKind::Mnist | DatasetKind::Cifar10 => 10,
            DatasetKind::Emnist => 62,
            DatasetKind::Cifar100 => 100,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DatasetKind::Mnist => "mnist",
            DatasetKind::Emnist => "emnist",
            DatasetKind::Cifar10 => "cifar10",
            DatasetKind::Cifar100 => "cifar100",
        }
    }
}

/// A labeled in-memory dataset: one feature row per sample.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    features: Array2<f32>,
    labels: Vec<usize>,
}

impl InMemoryDataset {
    pub fn new(features: Array2<f32>, labels: Vec<usize>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(DataError::InvalidParameter(
                "features and labels must have the same length",
            ));
        }
        Ok(Self { features, labels })
    }

    pub fn empty(dim: usize) -> Self {
        Self {
            features: Array2::zeros((0, dim)),
            labels: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> ArrayView2<f32> {
        self.features.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Returns the subset at the given row indices.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        for &i in indices {
            if i >= self.len() {
                return Err(DataError::OutOfBounds {
                    index: i,
                    len: self.len(),
                });
            }
        }
        let features = self.features.select(Axis(0), indices);
        let labels = indices.iter().map(|&i| self.labels[i]).collect();
        Ok(Self { features, labels })
    }

    /// Shuffles samples in place, keeping feature/label rows paired.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.features = self.features.select(Axis(0), &order);
        self.labels = order.iter().map(|&i| self.labels[i]).collect();
    }

    /// Splits off the last `fraction` of samples as a held-out set.
    pub fn split_holdout(mut self, fraction: f32) -> (Self, Self) {
        let n = self.len();
        let n_test = ((n as f32) * fraction).round() as usize;
        let n_train = n - n_test;

        let test_features = self.features.slice(ndarray::s![n_train.., ..]).to_owned();
        let test_labels = self.labels.split_off(n_train);
        let train_features = self.features.slice(ndarray::s![..n_train, ..]).to_owned();

        (
            Self {
                features: train_features,
                labels: self.labels,
            },
            Self {
                features: test_features,
                labels: test_labels,
            },
        )
    }
}
