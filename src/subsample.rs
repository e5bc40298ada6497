//! Maps an input grid to a coarser output grid by integer factors.
//!
//! The half-voxel offset used by the kernel depends on the parity of each
//! factor: even factors put the patch centre between voxels.

use crate::header::Header;
use crate::voxel::Index3;

/// Integer decimation factors and origin relating an input grid to a
/// coarser output grid.
#[derive(Clone, Debug)]
pub struct Subsample {
    factors: [usize; 3],
    origin: [usize; 3],
    header_in: Header,
    header_out: Header,
}

impl Subsample {
    pub fn new(header_in: Header, factors: [usize; 3]) -> Self {
        assert!(factors.iter().all(|&f| f >= 1), "subsample factors must be >= 1");
        // Output voxel (0,0,0) is centred on the input block it represents:
        // origin = floor(f / 2) puts the centre of the first f-wide block
        // at the canonical half-voxel position handled by the kernel.
        let origin = [factors[0] / 2, factors[1] / 2, factors[2] / 2];
        let out_size = [
            header_in.size[0].div_ceil(factors[0]),
            header_in.size[1].div_ceil(factors[1]),
            header_in.size[2].div_ceil(factors[2]),
        ];
        let out_spacing = [
            header_in.spacing[0] * factors[0] as f64,
            header_in.spacing[1] * factors[1] as f64,
            header_in.spacing[2] * factors[2] as f64,
        ];
        let mut header_out = Header::new(out_size, 1, out_spacing);
        // output voxel 0 maps to input voxel `origin`: translate the affine
        // so voxel->scanner of output (0,0,0) equals input's voxel2scanner(origin)
        let origin_scanner = header_in.voxel_to_scanner([origin[0] as f64, origin[1] as f64, origin[2] as f64]);
        for row in 0..3 {
            header_out.affine[row][0] = header_in.affine[row][0] * factors[0] as f64;
            header_out.affine[row][1] = header_in.affine[row][1] * factors[1] as f64;
            header_out.affine[row][2] = header_in.affine[row][2] * factors[2] as f64;
            header_out.affine[row][3] = origin_scanner[row];
        }
        Subsample {
            factors,
            origin,
            header_in,
            header_out,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header_out
    }

    pub fn input_header(&self) -> &Header {
        &self.header_in
    }

    pub fn factors(&self) -> [usize; 3] {
        self.factors
    }

    /// True iff `p` (an input-grid index) lies on the processed sublattice.
    pub fn process(&self, p: Index3) -> bool {
        (0..3).all(|i| {
            if p[i] < 0 {
                return false;
            }
            (p[i] as usize) % self.factors[i] == self.origin[i] % self.factors[i]
        })
    }

    /// Map a processed input-grid voxel to its output-grid coordinate.
    pub fn in_to_ss(&self, p: Index3) -> Index3 {
        [
            (p[0] - self.origin[0] as isize) / self.factors[0] as isize,
            (p[1] - self.origin[1] as isize) / self.factors[1] as isize,
            (p[2] - self.origin[2] as isize) / self.factors[2] as isize,
        ]
    }

    /// Map an output-grid voxel back to the input-grid voxel it represents.
    pub fn ss_to_in(&self, q: Index3) -> Index3 {
        [
            self.origin[0] as isize + q[0] * self.factors[0] as isize,
            self.origin[1] as isize + q[1] * self.factors[1] as isize,
            self.origin[2] as isize + q[2] * self.factors[2] as isize,
        ]
    }

    /// Half-voxel offsets applied to the kernel's integer patch box: 0.5
    /// when the corresponding factor is even (patch centre sits on a voxel
    /// boundary), 0 when it is odd (patch centre sits on a voxel).
    pub fn halfvoxel_offsets(&self) -> [f64; 3] {
        [
            if self.factors[0] % 2 == 0 { 0.5 } else { 0.0 },
            if self.factors[1] % 2 == 0 { 0.5 } else { 0.0 },
            if self.factors[2] % 2 == 0 { 0.5 } else { 0.0 },
        ]
    }
}
