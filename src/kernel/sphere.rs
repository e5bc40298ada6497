//! Sphere / nearest-K neighbourhood kernel: grows outward by squared
//! distance until at least the target voxel count is reached. Ties at the
//! boundary shell are all included, so patch size may exceed the target.

use crate::header::Header;
use crate::image::Mask;
use crate::voxel::{Index3, PatchData, Voxel};

use super::{Kernel, KernelBase};

pub struct Sphere {
    base: KernelBase,
    target_count: usize,
    max_half_extent: isize,
    min_spacing: f64,
}

impl Sphere {
    pub fn new(header: &Header, target_count: usize, halfvoxel_offsets: [f64; 3]) -> Self {
        assert!(target_count >= 1);
        let max_half_extent = *header.size.iter().max().unwrap() as isize;
        let min_spacing = header.spacing.iter().cloned().fold(f64::INFINITY, f64::min);
        Sphere {
            base: KernelBase::new(header, halfvoxel_offsets),
            target_count,
            max_half_extent,
            min_spacing,
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.base = self.base.with_mask(mask);
        self
    }
}

impl Kernel for Sphere {
    fn estimated_size(&self) -> usize {
        // A generous upper bound: smallest cube known (from past growth) to
        // contain at least target_count voxels is unknown in advance, so we
        // bound by the number of voxels in a box whose side is large enough
        // that, for a roughly uniform density, it holds several times the
        // target count. This only pre-sizes an allocation, never truncates.
        let r = ((self.target_count as f64).cbrt().ceil() as isize + 2).max(1);
        ((2 * r + 1).pow(3)) as usize
    }

    fn patch(&self, pos: Index3) -> PatchData {
        let centre_scanner = self.base.voxel_to_real(pos);
        let mut r: isize = 1;
        loop {
            let mut candidates: Vec<(Index3, f64)> = Vec::new();
            for dz in -r..=r {
                for dy in -r..=r {
                    for dx in -r..=r {
                        let idx = [pos[0] + dx, pos[1] + dy, pos[2] + dz];
                        if !self.base.in_bounds(idx) || !self.base.is_masked_in(idx) {
                            continue;
                        }
                        let sq_distance = self.base.sq_distance_scanner(centre_scanner, idx);
                        candidates.push((idx, sq_distance));
                    }
                }
            }
            candidates.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap()
                    .then_with(|| a.0.cmp(&b.0))
            });
            let covers_whole_image = r >= self.max_half_extent;
            if candidates.len() >= self.target_count || covers_whole_image {
                let safe_floor = (r as f64 * self.min_spacing).powi(2);
                let kth_distance = candidates
                    .get(self.target_count.saturating_sub(1).min(candidates.len().saturating_sub(1)))
                    .map(|(_, d)| *d)
                    .unwrap_or(0.0);
                if covers_whole_image || kth_distance <= safe_floor {
                    // include the target count plus any voxels tied with the
                    // last included one
                    let cutoff = if candidates.len() >= self.target_count {
                        let boundary = candidates[self.target_count - 1].1;
                        candidates
                            .iter()
                            .position(|(_, d)| *d > boundary)
                            .unwrap_or(candidates.len())
                    } else {
                        candidates.len()
                    };
                    let mut patch = PatchData::empty(centre_scanner);
                    for (i, (idx, sq_distance)) in candidates.into_iter().take(cutoff).enumerate() {
                        if idx == pos {
                            patch.centre_index = Some(i);
                        }
                        patch.max_distance = patch.max_distance.max(sq_distance.sqrt());
                        patch.voxels.push(Voxel::new(idx, sq_distance));
                    }
                    return patch;
                }
            }
            r += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::new([32, 32, 32], 32, [2.0, 2.0, 2.0])
    }

    #[test]
    fn reaches_at_least_target_count() {
        let h = header();
        let k = Sphere::new(&h, 27, [0.0, 0.0, 0.0]);
        let p = k.patch([16, 16, 16]);
        assert!(p.len() >= 27);
        assert!(p.centre_index.is_some());
    }

    #[test]
    fn determinism_across_repeated_calls() {
        let h = header();
        let k = Sphere::new(&h, 40, [0.0, 0.0, 0.0]);
        let p1 = k.patch([16, 16, 16]);
        let p2 = k.patch([16, 16, 16]);
        let idx1: Vec<_> = p1.voxels.iter().map(|v| v.index).collect();
        let idx2: Vec<_> = p2.voxels.iter().map(|v| v.index).collect();
        assert_eq!(idx1, idx2);
    }

    #[test]
    fn voxels_are_sorted_by_distance() {
        let h = header();
        let k = Sphere::new(&h, 33, [0.0, 0.0, 0.0]);
        let p = k.patch([16, 16, 16]);
        for w in p.voxels.windows(2) {
            assert!(w[0].sq_distance <= w[1].sq_distance);
        }
    }

    #[test]
    fn clamps_gracefully_near_small_image_edge() {
        let h = Header::new([4, 4, 4], 8, [2.0, 2.0, 2.0]);
        let k = Sphere::new(&h, 1000, [0.0, 0.0, 0.0]);
        let p = k.patch([0, 0, 0]);
        assert_eq!(p.len(), 64); // whole image, target unreachable
    }

    #[test]
    fn mask_can_exclude_centre() {
        let h = header();
        let mut mdata = ndarray::Array3::from_elem((32, 32, 32), true);
        mdata[[16, 16, 16]] = false;
        let mask = Mask::new(h.clone(), mdata);
        let k = Sphere::new(&h, 10, [0.0, 0.0, 0.0]).with_mask(mask);
        let p = k.patch([16, 16, 16]);
        assert_eq!(p.centre_index, None);
    }
}
