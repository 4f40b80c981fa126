//! Owen-scrambled Sobol draws and the normal base samples built from them.

use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, Normal};

use lb_types::AcquisitionError;

/// Dimensions available per scrambling seed.
pub const SOBOL_DIMENSIONS: usize = sobol_burley::NUM_DIMENSIONS as usize;

const UNIFORM_CLAMP: f64 = 1e-10;

/// Scramble block reserved for the normal base samples; [`sobol_unit`] pools
/// start after it.
const BASE_SAMPLE_BLOCK: usize = 0;

/// Derive the 32-bit scramble seed for one block of 256 dimensions.
fn block_seed(seed: u64, block: usize) -> u32 {
    let folded = (seed as u32) ^ ((seed >> 32) as u32);
    folded ^ (block as u32).wrapping_mul(0x9E37_79B9)
}

/// `n` points of a scrambled Sobol sequence in `[0, 1)^dims`.
///
/// Every block of 256 dimensions gets its own scramble, none of them shared
/// with the normal base samples drawn from the same seed.
pub fn sobol_unit(n: usize, dims: usize, seed: u64) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| {
            (0..dims)
                .map(|d| {
                    let block = BASE_SAMPLE_BLOCK + 1 + d / SOBOL_DIMENSIONS;
                    let dim = (d % SOBOL_DIMENSIONS) as u32;
                    f64::from(sobol_burley::sample(i as u32, dim, block_seed(seed, block)))
                })
                .collect()
        })
        .collect()
}

/// `mc_samples × q` standard-normal base samples shared by every batch
/// evaluated in one acquisition call.
pub fn normal_base_samples(
    mc_samples: usize,
    q: usize,
    seed: u64,
) -> Result<DMatrix<f64>, AcquisitionError> {
    if q == 0 || q > SOBOL_DIMENSIONS {
        return Err(AcquisitionError::InvalidBatchSize {
            q,
            limit: SOBOL_DIMENSIONS,
        });
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| AcquisitionError::InvalidRequest {
        message: e.to_string(),
    })?;

    let scramble = block_seed(seed, BASE_SAMPLE_BLOCK);
    let mut samples = DMatrix::zeros(mc_samples, q);
    for i in 0..mc_samples {
        for j in 0..q {
            let u = f64::from(sobol_burley::sample(i as u32, j as u32, scramble))
                .clamp(UNIFORM_CLAMP, 1.0 - UNIFORM_CLAMP);
            samples[(i, j)] = normal.inverse_cdf(u);
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sobol_points_in_unit_cube() {
        let pts = sobol_unit(64, 300, 3);
        assert_eq!(pts.len(), 64);
        assert!(pts.iter().all(|p| p.len() == 300));
        assert!(pts.iter().flatten().all(|u| (0.0..=1.0).contains(u)));
    }

    #[test]
    fn same_seed_same_samples() {
        let a = normal_base_samples(128, 3, 11).unwrap();
        let b = normal_base_samples(128, 3, 11).unwrap();
        assert_eq!(a, b);
        let c = normal_base_samples(128, 3, 12).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn base_samples_look_standard_normal() {
        let z = normal_base_samples(1024, 2, 0).unwrap();
        assert!(z.iter().all(|v| v.is_finite()));
        for j in 0..2 {
            let col = z.column(j);
            let mean = col.mean();
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 1023.0;
            assert!(mean.abs() < 0.05, "mean {mean}");
            assert!((var - 1.0).abs() < 0.1, "var {var}");
        }
    }

    #[test]
    fn pool_does_not_reuse_base_sample_draws() {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let pool = sobol_unit(32, 2, 7);
        let z = normal_base_samples(32, 2, 7).unwrap();
        let shared = (0..32)
            .filter(|&i| {
                (0..2).all(|j| {
                    let u = pool[i][j].clamp(UNIFORM_CLAMP, 1.0 - UNIFORM_CLAMP);
                    normal.inverse_cdf(u) == z[(i, j)]
                })
            })
            .count();
        assert_eq!(shared, 0);
    }

    #[test]
    fn rejects_oversized_batch() {
        assert!(matches!(
            normal_base_samples(8, SOBOL_DIMENSIONS + 1, 0),
            Err(AcquisitionError::InvalidBatchSize { .. })
        ));
        assert!(normal_base_samples(8, 0, 0).is_err());
    }
}
