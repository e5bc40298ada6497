//! Supplied-sigma estimator: the noise variance is an input, not a fit.
//! Still derives `lamplus` / `cutoff_p` from it via the standard MP-edge
//! sweep, and optionally rescales against a variance-stabilising field.

use ndarray::Array1;

use super::geometry::{dimlong_nonzero, rank_nonzero, rank_zero};
use super::{EstimatorResult, VstLookup};

pub fn evaluate(
    sigma2_in: f64,
    s: &Array1<f64>,
    m: usize,
    n: usize,
    rp: usize,
    pos: [f64; 3],
    vst: Option<&dyn VstLookup>,
) -> EstimatorResult {
    let qnz = dimlong_nonzero(m, n, rp) as f64;
    let rz = rank_zero(m, n, rp);
    let rnz = rank_nonzero(m, n, rp);

    let sigma2 = match vst {
        Some(field) => match field.sample(pos) {
            Some(v) if v != 0.0 => sigma2_in / (v * v),
            _ => return EstimatorResult::invalid(),
        },
        None => sigma2_in,
    };

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

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstVst(f64);
    impl VstLookup for ConstVst {
        fn sample(&self, _pos: [f64; 3]) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn no_vst_passes_sigma_through() {
        let s = Array1::from_vec(vec![0.1, 0.2, 0.3, 5.0]);
        let result = evaluate(0.25, &s, 4, 4, 0, [0.0, 0.0, 0.0], None);
        assert!(result.is_valid());
        assert!((result.sigma2 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn vst_rescales_sigma_by_inverse_square() {
        let s = Array1::from_vec(vec![0.1, 0.2, 0.3, 5.0]);
        let vst = ConstVst(2.0);
        let result = evaluate(1.0, &s, 4, 4, 0, [0.0, 0.0, 0.0], Some(&vst));
        assert!((result.sigma2 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn vst_out_of_support_is_invalid() {
        struct NoneVst;
        impl VstLookup for NoneVst {
            fn sample(&self, _pos: [f64; 3]) -> Option<f64> {
                None
            }
        }
        let s = Array1::from_vec(vec![0.1, 0.2]);
        let result = evaluate(1.0, &s, 2, 2, 0, [0.0, 0.0, 0.0], Some(&NoneVst));
        assert!(!result.is_valid());
    }
}
