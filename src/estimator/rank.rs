//! Forced-rank estimator: the signal rank is supplied directly rather than
//! fitted, trading the noise estimate for an operator's prior knowledge.

use ndarray::Array1;

use super::geometry::{dimlong_nonzero, rank_nonzero, rank_zero};
use super::EstimatorResult;

pub fn evaluate(rank: usize, s: &Array1<f64>, m: usize, n: usize, rp: usize) -> EstimatorResult {
    let qnz = dimlong_nonzero(m, n, rp) as f64;
    let rz = rank_zero(m, n, rp);
    let rnz = rank_nonzero(m, n, rp);

    if rnz == rank {
        return EstimatorResult {
            cutoff_p: 0,
            sigma2: 0.0,
            lamplus: 0.0,
        };
    }
    if rnz > rank {
        // rank includes the rz structurally-zero components.
        let cutoff_p = s.len() - (rank - rz);
        let sigma2 = s.slice(ndarray::s![rz..cutoff_p]).sum() / (qnz * (cutoff_p - rz) as f64);
        let lamplus = s[cutoff_p - 1] / qnz;
        return EstimatorResult {
            cutoff_p,
            sigma2,
            lamplus,
        };
    }
    // Requested rank exceeds what the patch can support.
    EstimatorResult::invalid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_rank_matching_available_rank_is_all_signal() {
        let s = Array1::from_vec(vec![0.1, 0.2, 0.3, 5.0]);
        let result = evaluate(4, &s, 4, 4, 0);
        assert_eq!(result.cutoff_p, 0);
        assert_eq!(result.sigma2, 0.0);
        assert!(result.is_valid());
    }

    #[test]
    fn requested_rank_below_available_rank_fits_noise_tail() {
        let s = Array1::from_vec(vec![0.1, 0.2, 0.3, 5.0]);
        let result = evaluate(1, &s, 4, 4, 0);
        assert!(result.is_valid());
        assert_eq!(result.cutoff_p, 3);
    }

    #[test]
    fn over_requested_rank_is_invalid() {
        let s = Array1::from_vec(vec![0.1, 0.2, 0.3, 5.0]);
        let result = evaluate(5, &s, 4, 4, 0);
        assert!(!result.is_valid());
    }
}
