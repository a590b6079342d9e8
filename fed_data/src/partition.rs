use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::dataset::InMemoryDataset;
use crate::error::{DataError, Result};
use crate::synthetic::SyntheticTask;

/// How samples are spread across simulated clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Partition {
    /// Every client draws classes uniformly.
    Iid,
    /// Per-class Dirichlet allocation across clients; smaller `beta` means
    /// more heterogeneous clients.
    Dirichlet { beta: f32 },
    /// Pathological split: each client holds exactly two classes, with
    /// `samples_per_client` samples of each.
    LotteryFl,
}

/// One simulated client's local data.
#[derive(Debug, Clone)]
pub struct ClientData {
    pub id: usize,
    pub train: InMemoryDataset,
    pub test: InMemoryDataset,
}

impl ClientData {
    pub fn train_size(&self) -> usize {
        self.train.len()
    }
}

/// Fraction of each client's data held out as its local test set.
const HOLDOUT_FRACTION: f32 = 0.2;

/// Label multiset per client under the given partition scheme.
fn client_label_sets<R: Rng + ?Sized>(
    partition: Partition,
    num_classes: usize,
    total_clients: usize,
    samples_per_client: usize,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>> {
    if total_clients == 0 {
        return Err(DataError::InvalidParameter("total_clients must be positive"));
    }
    if samples_per_client == 0 {
        return Err(DataError::InvalidParameter(
            "samples_per_client must be positive",
        ));
    }

    let mut labels: Vec<Vec<usize>> = vec![Vec::new(); total_clients];
    match partition {
        Partition::Iid => {
            for client in labels.iter_mut() {
                for _ in 0..samples_per_client {
                    client.push(rng.random_range(0..num_classes));
                }
            }
        }

        Partition::Dirichlet { beta } => {
            if beta <= 0.0 {
                return Err(DataError::InvalidParameter("beta must be positive"));
            }
            let gamma = Gamma::new(beta, 1.0)
                .map_err(|_| DataError::InvalidParameter("beta must be positive and finite"))?;

            // per class, split the class's sample pool across clients with
            // Dirichlet(beta) proportions (normalized Gamma draws)
            let per_class = (total_clients * samples_per_client) / num_classes;
            for class in 0..num_classes {
                let mut weights: Vec<f32> =
                    (0..total_clients).map(|_| gamma.sample(rng).max(1e-10)).collect();
                let total: f32 = weights.iter().sum();
                for w in &mut weights {
                    *w /= total;
                }
                for (client, &w) in labels.iter_mut().zip(&weights) {
                    let count = (w * per_class as f32).round() as usize;
                    client.extend(std::iter::repeat(class).take(count));
                }
            }
        }

        Partition::LotteryFl => {
            for (id, client) in labels.iter_mut().enumerate() {
                // two classes per client, spread deterministically then
                // perturbed so clients don't align with class boundaries
                let first = rng.random_range(0..num_classes);
                let second = (first + 1 + id % (num_classes - 1).max(1)) % num_classes;
                for class in [first, second] {
                    client.extend(std::iter::repeat(class).take(samples_per_client));
                }
            }
        }
    }
    Ok(labels)
}

/// Builds every eligible client's local train/test data.
///
/// Clients whose training split would hold fewer than `min_samples` samples
/// are dropped, matching the original participation rule.
pub fn build_clients<R: Rng + ?Sized>(
    task: &SyntheticTask,
    partition: Partition,
    total_clients: usize,
    samples_per_client: usize,
    min_samples: usize,
    rng: &mut R,
) -> Result<Vec<ClientData>> {
    let label_sets = client_label_sets(
        partition,
        task.kind().num_classes(),
        total_clients,
        samples_per_client,
        rng,
    )?;

    let mut clients = Vec::new();
    for (id, labels) in label_sets.into_iter().enumerate() {
        if labels.is_empty() {
            continue;
        }
        let mut dataset = task.make_dataset(&labels, rng)?;
        dataset.shuffle(rng);
        let (train, test) = dataset.split_holdout(HOLDOUT_FRACTION);

        if train.len() < min_samples || train.is_empty() || test.is_empty() {
            continue;
        }
        clients.push(ClientData { id, train, test });
    }

    if clients.is_empty() {
        return Err(DataError::NoClients { min_samples });
    }

    debug!(clients = clients.len(), total = total_clients; "partitioned dataset");
    Ok(clients)
}
