use log::debug;
use ndarray::{Array1, Array2, Zip};

use sparse_ml::NetState;

use crate::client::Update;
use crate::error::{FederationError, Result};

/// Result of one round of vote-weighted masked averaging.
pub struct Aggregate {
    /// Average of client contributions only; the weights that get served
    /// once the round's mask is settled.
    pub params: NetState,
    /// Same average with stale server weights backfilled where every client
    /// pruned (`remember_old`); the state the next mask is derived from.
    pub mask_params: NetState,
}

/// Masked FedAvg over one round's updates.
///
/// Each entry's vote count is the sum of `train_size` over the clients whose
/// mask kept it. Entries whose votes do not exceed `min_votes` are dropped;
/// the rest are averaged by their votes. With `remember_old` the server's own
/// weight also votes wherever its mask bit survives but a client's does not.
pub fn aggregate(
    global: &NetState,
    updates: &[Update],
    min_votes: f32,
    remember_old: bool,
) -> Result<Aggregate> {
    if updates.is_empty() {
        return Err(FederationError::InvalidConfig(
            "cannot aggregate an empty round".to_string(),
        ));
    }

    let n_layers = global.num_layers();
    let mut weights = Vec::with_capacity(n_layers);
    let mut mask_weights = Vec::with_capacity(n_layers);
    let mut masks = Vec::with_capacity(n_layers);
    let mut biases = Vec::with_capacity(n_layers);

    let n_total: f32 = updates.iter().map(|u| u.train_size as f32).sum();

    for i in 0..n_layers {
        let dim = global.weights[i].raw_dim();
        let mut num = Array2::<f32>::zeros(dim);
        let mut votes = Array2::<f32>::zeros(dim);
        let mut bias = Array1::<f32>::zeros(global.biases[i].len());

        for u in updates {
            let n = u.train_size as f32;
            Zip::from(&mut num)
                .and(&mut votes)
                .and(&u.state.weights[i])
                .and(&u.state.masks[i])
                .for_each(|num, votes, &w, &m| {
                    if m {
                        *num += n * w;
                        *votes += n;
                    }
                });
            bias.scaled_add(n, &u.state.biases[i]);
        }

        let mut num_mask = num.clone();
        if remember_old {
            for u in updates {
                let n = u.train_size as f32;
                Zip::from(&mut num_mask)
                    .and(&mut votes)
                    .and(&global.weights[i])
                    .and(&global.masks[i])
                    .and(&u.state.masks[i])
                    .for_each(|num, votes, &gw, &gm, &cm| {
                        if gm && !cm {
                            *num += n * gw;
                            *votes += n;
                        }
                    });
            }
        }

        // strict threshold, then divide; entries without votes become 0
        votes.mapv_inplace(|v| if v > min_votes { v } else { 0.0 });

        let mut mask = Array2::<bool>::from_elem(dim, false);
        Zip::from(&mut num)
            .and(&mut num_mask)
            .and(&mut mask)
            .and(&votes)
            .for_each(|num, num_mask, mask, &v| {
                if v > 0.0 {
                    *num /= v;
                    *num_mask /= v;
                    *mask = true;
                } else {
                    *num = 0.0;
                    *num_mask = 0.0;
                }
            });

        bias /= n_total;
        weights.push(num);
        mask_weights.push(num_mask);
        masks.push(mask);
        biases.push(bias);
    }

    let kept: usize = masks
        .iter()
        .map(|m| m.iter().filter(|&&b| b).count())
        .sum();
    debug!(updates = updates.len(), kept = kept; "aggregated round");

    Ok(Aggregate {
        params: NetState {
            weights,
            biases: biases.clone(),
            masks: masks.clone(),
        },
        mask_params: NetState {
            weights: mask_weights,
            biases,
            masks,
        },
    })
}

/// Zeroes `state`'s weights outside `masks` and adopts them.
pub fn impose_masks(state: &mut NetState, masks: &[Array2<bool>]) {
    for (i, mask) in masks.iter().enumerate() {
        Zip::from(&mut state.weights[i])
            .and(mask)
            .for_each(|w, &m| {
                if !m {
                    *w = 0.0;
                }
            });
        state.masks[i].assign(mask);
    }
}
