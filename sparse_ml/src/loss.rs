use ndarray::{Array2, ArrayView2, Axis};

/// Softmax cross-entropy over raw logits.
///
/// `loss` reports the mean negative log-likelihood of the labels; `loss_prime`
/// produces the error signal `(softmax(z) - onehot) / batch` consumed by
/// backprop.
#[derive(Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        Self
    }

    fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
        let mut p = logits.to_owned();
        for mut row in p.rows_mut() {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        p
    }

    pub fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> f32 {
        let p = Self::softmax(logits);
        let n = labels.len().max(1);
        let nll: f32 = labels
            .iter()
            .enumerate()
            .map(|(i, &y)| -(p[[i, y]].max(1e-12)).ln())
            .sum();
        nll / n as f32
    }

    pub fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Array2<f32> {
        let mut d = Self::softmax(logits);
        let n = labels.len().max(1) as f32;
        for (i, &y) in labels.iter().enumerate() {
            d[[i, y]] -= 1.0;
        }
        d /= n;
        d
    }
}

/// Row-wise argmax, the predicted class per sample.
pub fn argmax_rows(logits: ArrayView2<f32>) -> Vec<usize> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0)
        })
        .collect()
}
