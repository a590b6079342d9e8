/// Cosine annealing for the mask readjustment ratio.
///
/// Returns `alpha/2 * (1 + cos(t * pi / t_end))`, clamped to 0 once `t`
/// reaches `t_end`.
pub fn cosine_decay(t: usize, alpha: f32, t_end: usize) -> f32 {
    if t >= t_end {
        return 0.0;
    }
    alpha / 2.0 * (1.0 + (t as f32 * std::f32::consts::PI / t_end as f32).cos())
}

/// Sparsity targeted at the end of a given round.
///
/// Interpolates linearly from `initial` to `final_sparsity` until
/// `decay_end`, constant afterwards.
pub fn round_sparsity(round: usize, initial: f32, final_sparsity: f32, decay_end: usize) -> f32 {
    if decay_end == 0 || round > decay_end {
        return final_sparsity;
    }
    let t = round as f32 / decay_end as f32;
    initial * (1.0 - t) + final_sparsity * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_decay_endpoints() {
        let alpha = 0.5;
        assert!((cosine_decay(0, alpha, 200) - alpha).abs() < 1e-6);
        assert!(cosine_decay(200, alpha, 200).abs() < 1e-9);
        assert!(cosine_decay(500, alpha, 200).abs() < 1e-9);

        // halfway through the schedule the ratio is alpha/2
        assert!((cosine_decay(100, alpha, 200) - alpha / 2.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_decay_monotone() {
        let mut prev = f32::MAX;
        for t in 0..100 {
            let v = cosine_decay(t, 0.3, 100);
            assert!(v <= prev);
            prev = v;
        }
    }

    #[test]
    fn round_sparsity_interpolates() {
        assert!((round_sparsity(0, 0.1, 0.5, 100) - 0.1).abs() < 1e-6);
        assert!((round_sparsity(50, 0.1, 0.5, 100) - 0.3).abs() < 1e-6);
        assert!((round_sparsity(100, 0.1, 0.5, 100) - 0.5).abs() < 1e-6);
        assert!((round_sparsity(400, 0.1, 0.5, 100) - 0.5).abs() < 1e-6);
    }
}
