use ndarray::{Array1, Array2, Zip};

use crate::error::Result;
use crate::net::PrunableNet;

/// SGD with momentum and L2 weight decay.
///
/// Matches the usual formulation: `v = mu * v + (g + wd * w)`,
/// `w -= lr * v`, one velocity buffer per parameter tensor.
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    vel_w: Vec<Array2<f32>>,
    vel_b: Vec<Array1<f32>>,
}

impl Sgd {
    pub fn new(net: &PrunableNet, lr: f32, momentum: f32, weight_decay: f32) -> Self {
        let vel_w = net
            .layers()
            .iter()
            .map(|l| Array2::zeros(l.weights().raw_dim()))
            .collect();
        let vel_b = net
            .layers()
            .iter()
            .map(|l| Array1::zeros(l.fan_out()))
            .collect();
        Self {
            lr,
            momentum,
            weight_decay,
            vel_w,
            vel_b,
        }
    }

    /// Applies one update from the gradients accumulated in `net`.
    pub fn step(&mut self, net: &mut PrunableNet) -> Result<()> {
        for (i, layer) in net.layers_mut().iter_mut().enumerate() {
            Zip::from(&mut self.vel_w[i])
                .and(&layer.grad_w)
                .and(&layer.weights)
                .for_each(|v, &g, &w| {
                    *v = self.momentum * *v + g + self.weight_decay * w;
                });
            Zip::from(&mut layer.weights)
                .and(&self.vel_w[i])
                .for_each(|w, &v| *w -= self.lr * v);

            Zip::from(&mut self.vel_b[i])
                .and(&layer.grad_b)
                .and(&layer.bias)
                .for_each(|v, &g, &b| {
                    *v = self.momentum * *v + g + self.weight_decay * b;
                });
            Zip::from(&mut layer.bias)
                .and(&self.vel_b[i])
                .for_each(|b, &v| *b -= self.lr * v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Activation, MaskedDense};
    use ndarray::array;

    fn one_layer() -> PrunableNet {
        let l = MaskedDense::new(array![[1.0]], array![0.0], Activation::Linear);
        PrunableNet::new(vec![l]).unwrap()
    }

    #[test]
    fn plain_sgd_step() {
        let mut net = one_layer();
        let mut opt = Sgd::new(&net, 0.1, 0.0, 0.0);

        let _ = net.forward(array![[2.0]].view()).unwrap();
        net.backward(array![[1.0]]).unwrap(); // grad_w = 2.0
        opt.step(&mut net).unwrap();

        assert!((net.layers()[0].weights()[[0, 0]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn momentum_accumulates() {
        let mut net = one_layer();
        let mut opt = Sgd::new(&net, 0.1, 0.9, 0.0);

        for _ in 0..2 {
            let _ = net.forward(array![[1.0]].view()).unwrap();
            net.backward(array![[1.0]]).unwrap();
            opt.step(&mut net).unwrap();
        }

        // first step: v=g1, second step: v=0.9*g1+g2; with unit input the
        // second update is strictly larger than a momentum-free one
        let w = net.layers()[0].weights()[[0, 0]];
        assert!(w < 1.0 - 0.1 - 0.1);
    }

    #[test]
    fn weight_decay_shrinks_weights() {
        let mut net = one_layer();
        let mut opt = Sgd::new(&net, 0.1, 0.0, 0.5);

        net.layers_mut()[0].grad_w.fill(0.0);
        opt.step(&mut net).unwrap();
        assert!((net.layers()[0].weights()[[0, 0]] - 0.95).abs() < 1e-6);
    }
}
