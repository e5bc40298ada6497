//! Unity estimator: assumes the data were already normalised to unit noise
//! variance by an earlier variance-stabilising pass, so sigma2 is fixed at
//! 1.0 and only the rank/lamplus sweep remains.

use ndarray::Array1;

use super::geometry::{dimlong_nonzero, rank_nonzero, rank_zero};
use super::EstimatorResult;

pub fn evaluate(s: &Array1<f64>, m: usize, n: usize, rp: usize) -> EstimatorResult {
    let qnz = dimlong_nonzero(m, n, rp) as f64;
    let rz = rank_zero(m, n, rp);
    let rnz = rank_nonzero(m, n, rp);

    let sigma2 = 1.0;
    let lamplus = (1.0 + (rnz as f64 / qnz).sqrt()).powi(2);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigma2_is_always_one() {
        let s = Array1::from_vec(vec![0.1, 0.5, 1.0, 6.0]);
        let result = evaluate(&s, 4, 4, 0);
        assert_eq!(result.sigma2, 1.0);
        assert!(result.is_valid());
    }
}
