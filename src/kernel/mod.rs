//! Patch-selection "kernels": given a centre voxel, return a [`PatchData`]
//! of contributing input voxels.

mod cuboid;
mod sphere;

pub use cuboid::Cuboid;
pub use sphere::Sphere;

use crate::header::Header;
use crate::image::Mask;
use crate::voxel::{Index3, PatchData};

/// Shared contract for kernel variants.
pub trait Kernel: Send + Sync {
    /// A tight upper bound on patch size, used to pre-allocate PCA buffers
    /// without reallocation during the scan.
    fn estimated_size(&self) -> usize;

    /// Build the patch centred at `pos` (an input-grid index).
    fn patch(&self, pos: Index3) -> PatchData;
}

/// Fields and helpers shared by both kernel variants.
pub(crate) struct KernelBase {
    size: [usize; 3],
    header: Header,
    halfvoxel_offsets: [f64; 3],
    mask: Option<Mask>,
}

impl KernelBase {
    pub(crate) fn new(header: &Header, halfvoxel_offsets: [f64; 3]) -> Self {
        KernelBase {
            size: header.size,
            header: header.clone(),
            halfvoxel_offsets,
            mask: None,
        }
    }

    pub(crate) fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub(crate) fn in_bounds(&self, idx: Index3) -> bool {
        (0..3).all(|i| idx[i] >= 0 && (idx[i] as usize) < self.size[i])
    }

    pub(crate) fn is_masked_in(&self, idx: Index3) -> bool {
        match &self.mask {
            None => true,
            Some(m) => self.in_bounds(idx) && m.is_set(idx[0] as usize, idx[1] as usize, idx[2] as usize),
        }
    }

    /// Translate an input-grid index into the realspace position used for
    /// the patch centre and for squared-distance computation, accounting
    /// for the subsample-parity half-voxel offset, through the header's
    /// full affine (rotation/shear included, not just spacing and
    /// translation).
    pub(crate) fn voxel_to_real(&self, pos: Index3) -> [f64; 3] {
        self.header.voxel_to_scanner([
            pos[0] as f64 + self.halfvoxel_offsets[0],
            pos[1] as f64 + self.halfvoxel_offsets[1],
            pos[2] as f64 + self.halfvoxel_offsets[2],
        ])
    }

    pub(crate) fn sq_distance_scanner(&self, a: [f64; 3], b: Index3) -> f64 {
        let bp = self.header.voxel_to_scanner([b[0] as f64, b[1] as f64, b[2] as f64]);
        (0..3).map(|i| (a[i] - bp[i]).powi(2)).sum()
    }
}
