//! Geometry helpers resolving matrix dimensions under rank-deficient
//! preconditioning.
//!
//! - `m` — number of image volumes
//! - `n` — number of voxels in the patch
//! - `rp` — preconditioner rank deficit (0 or 1 in this engine)

/// `max(M, N) - rp`: the long dimension, discounting the preconditioner's
/// null space.
pub fn dimlong_nonzero(m: usize, n: usize, rp: usize) -> usize {
    m.max(n) - rp
}

/// `min(M, N) - rp`: the short (non-null) dimension.
pub fn rank_nonzero(m: usize, n: usize, rp: usize) -> usize {
    m.min(n) - rp
}

/// `rp`: the number of structurally-zero eigenvalues at the low end of the
/// sorted spectrum.
pub fn rank_zero(_m: usize, _n: usize, rp: usize) -> usize {
    rp
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn geometry_identity_holds() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for _ in 0..500 {
            let m: usize = rng.random_range(2..200);
            let n: usize = rng.random_range(2..200);
            let rp = if m.min(n) > 1 { rng.random_range(0..2) } else { 0 };
            let q = dimlong_nonzero(m, n, rp);
            let r = rank_nonzero(m, n, rp);
            let z = rank_zero(m, n, rp);
            assert_eq!(q + z, m.max(n));
            assert_eq!(r + z, m.min(n));
        }
    }
}
