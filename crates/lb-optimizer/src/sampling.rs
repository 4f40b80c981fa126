//! Uniform random initial design.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use lb_types::{Bounds, Point};

/// `n` points drawn uniformly inside `bounds` from a ChaCha stream seeded
/// with `seed`.
pub fn initial_design(bounds: &Bounds, n: usize, seed: u64) -> Vec<Point> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            bounds
                .lower()
                .iter()
                .zip(bounds.upper())
                .map(|(&lo, &hi)| rng.random_range(lo..hi))
                .collect()
        })
        .collect()
}
