//! Cholesky factorization with diagonal jitter fallback.

use nalgebra::{linalg::Cholesky, DMatrix, Dyn};

use lb_types::SurrogateError;

/// Jitter levels tried in order, relative to the mean diagonal magnitude.
const JITTER_LADDER: [f64; 4] = [0.0, 1e-8, 1e-6, 1e-4];

/// Factor a symmetric matrix, adding increasing diagonal jitter until the
/// factorization succeeds.
pub fn robust_cholesky(matrix: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, SurrogateError> {
    let last = JITTER_LADDER[JITTER_LADDER.len() - 1];
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(SurrogateError::SingularKernel { jitter: last });
    }

    let n = matrix.nrows();
    let scale = if n == 0 {
        1.0
    } else {
        (matrix.diagonal().iter().map(|v| v.abs()).sum::<f64>() / n as f64).max(1e-12)
    };

    for &jitter in &JITTER_LADDER {
        let mut m = matrix.clone();
        if jitter > 0.0 {
            for i in 0..n {
                m[(i, i)] += jitter * scale;
            }
        }
        if let Some(chol) = Cholesky::new(m) {
            // A zero pivot still factors but leaves inf/NaN below it.
            let healthy = chol
                .l_dirty()
                .diagonal()
                .iter()
                .all(|d| d.is_finite() && *d > 0.0);
            if healthy && chol.l_dirty().iter().all(|v| v.is_finite()) {
                return Ok(chol);
            }
        }
    }
    Err(SurrogateError::SingularKernel { jitter: last })
}
