//! Gavish-Donoho (2014) median-eigenvalue estimator.

use ndarray::Array1;

use super::geometry::{dimlong_nonzero, rank_nonzero, rank_zero};
use super::EstimatorResult;

/// Third-order polynomial fit to the Marchenko-Pastur median, as tabulated
/// by Gavish and Donoho against their own numerically generated reference.
fn mu(beta: f64) -> f64 {
    let beta_sq = beta * beta;
    1.0 - 0.3338169644754149 * beta - 0.007508551496715836 * beta_sq - 0.005882794526340723 * beta_sq * beta
}

pub fn evaluate(s: &Array1<f64>, m: usize, n: usize, rp: usize) -> EstimatorResult {
    let qnz = dimlong_nonzero(m, n, rp) as f64;
    let rz = rank_zero(m, n, rp);
    let rnz = rank_nonzero(m, n, rp);
    let tail_len = s.len() - rz;
    let ymed = if tail_len % 2 == 1 {
        s[rz + tail_len / 2]
    } else {
        0.5 * (s[rz + tail_len / 2 - 1] + s[rz + tail_len / 2])
    };
    let beta = rnz as f64 / qnz;
    let sigma2 = ymed / (qnz * mu(beta));
    let lamplus = (1.0 + (rnz as f64 / qnz).sqrt()).powi(2) * sigma2;

    let mut cutoff_p = rz;
    for p in rz..s.len() {
        if s[p] / qnz > lamplus {
            break;
        }
        cutoff_p = p + 1;
    }

    EstimatorResult {
        cutoff_p,
        sigma2,
        lamplus,
    }
}
