//! Matérn 5/2 kernel with ARD lengthscales.
//!
//! `k(x1, x2) = s² (1 + √5 r + 5/3 r²) exp(-√5 r)`
//! where `r = sqrt(Σ ((x1_i - x2_i) / l_i)²)`.

use nalgebra::DMatrix;

const SQRT_5: f64 = 2.236_067_977_499_79;

pub(crate) fn matern52(x1: &[f64], x2: &[f64], lengthscales: &[f64], outputscale: f64) -> f64 {
    let r_sq: f64 = x1
        .iter()
        .zip(x2)
        .zip(lengthscales)
        .map(|((a, b), l)| {
            let diff = (a - b) / l;
            diff * diff
        })
        .sum();
    let r = r_sq.sqrt();
    let sqrt5_r = SQRT_5 * r;
    outputscale * (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
}

/// Kernel value plus its derivative with respect to each log-lengthscale,
/// written into `grad`.
///
/// `∂k/∂ln l_d = s² · 5/3 · (1 + √5 r) · exp(-√5 r) · (Δ_d / l_d)²`
pub(crate) fn matern52_with_grad(
    x1: &[f64],
    x2: &[f64],
    lengthscales: &[f64],
    outputscale: f64,
    grad: &mut [f64],
) -> f64 {
    let mut r_sq = 0.0;
    for (d, g) in grad.iter_mut().enumerate() {
        let diff = (x1[d] - x2[d]) / lengthscales[d];
        *g = diff * diff;
        r_sq += *g;
    }
    let r = r_sq.sqrt();
    let sqrt5_r = SQRT_5 * r;
    let decay = (-sqrt5_r).exp();
    let factor = outputscale * 5.0 / 3.0 * (1.0 + sqrt5_r) * decay;
    for g in grad.iter_mut() {
        *g *= factor;
    }
    outputscale * (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * decay
}

/// Symmetric kernel matrix over `x` (no noise term).
pub(crate) fn kernel_matrix(x: &[Vec<f64>], lengthscales: &[f64], outputscale: f64) -> DMatrix<f64> {
    let n = x.len();
    let mut k = DMatrix::zeros(n, n);
    for i in 0..n {
        k[(i, i)] = outputscale;
        for j in 0..i {
            let v = matern52(&x[i], &x[j], lengthscales, outputscale);
            k[(i, j)] = v;
            k[(j, i)] = v;
        }
    }
    k
}

/// `a.len() × b.len()` cross-covariance matrix.
pub(crate) fn cross_kernel(
    a: &[Vec<f64>],
    b: &[Vec<f64>],
    lengthscales: &[f64],
    outputscale: f64,
) -> DMatrix<f64> {
    DMatrix::from_fn(a.len(), b.len(), |i, j| {
        matern52(&a[i], &b[j], lengthscales, outputscale)
    })
}
