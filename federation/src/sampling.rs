use rand::Rng;

/// Draws `count` client indices with replacement, the original sampler: a
/// client can train more than once in the same round and its update is
/// counted each time.
pub fn sample_clients<R: Rng + ?Sized>(rng: &mut R, n_clients: usize, count: usize) -> Vec<usize> {
    (0..count).map(|_| rng.random_range(0..n_clients)).collect()
}
