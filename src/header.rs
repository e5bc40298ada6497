//! Header metadata shared between an [`crate::image::Image`] and the output
//! maps derived from it.
//!
//! Headers are immutable value objects, cloned by value rather than shared as
//! mutable state (per the design note on shared headers): cloning a
//! `Header` is cheap (a handful of floats plus a small string map), so there
//! is no need for reference counting here.

use std::collections::HashMap;

/// Voxel-to-scanner affine, per-axis spacing, and free-form key/value
/// metadata (notably `shells` / `shellcounts`, consumed only by the
/// companion SH-SVD tool and otherwise treated as opaque strings here).
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    /// 3x4 affine mapping (i, j, k, 1) voxel coordinates to scanner-space
    /// (x, y, z), row-major: `affine[row][col]`.
    pub affine: [[f64; 4]; 3],
    /// Spatial size along the three spatial axes.
    pub size: [usize; 3],
    /// Number of volumes (the 4th axis). `1` for a 3-dimensional export.
    pub volumes: usize,
    /// Per-axis voxel spacing in scanner units.
    pub spacing: [f64; 3],
    pub metadata: HashMap<String, String>,
}

impl Header {
    pub fn new(size: [usize; 3], volumes: usize, spacing: [f64; 3]) -> Self {
        let affine = [
            [spacing[0], 0.0, 0.0, 0.0],
            [0.0, spacing[1], 0.0, 0.0],
            [0.0, 0.0, spacing[2], 0.0],
        ];
        Header {
            affine,
            size,
            volumes,
            spacing,
            metadata: HashMap::new(),
        }
    }

    /// Map a voxel index (continuous, to allow half-voxel offsets) to a
    /// scanner-space position.
    pub fn voxel_to_scanner(&self, pos: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for row in 0..3 {
            out[row] = self.affine[row][0] * pos[0]
                + self.affine[row][1] * pos[1]
                + self.affine[row][2] * pos[2]
                + self.affine[row][3];
        }
        out
    }

    /// Inverse of [`Header::voxel_to_scanner`]: map a scanner-space
    /// position back to continuous voxel coordinates by inverting the 3x3
    /// linear part of the affine and subtracting the translation.
    pub fn scanner_to_voxel(&self, pos: [f64; 3]) -> [f64; 3] {
        let a = &self.affine;
        let rel = [pos[0] - a[0][3], pos[1] - a[1][3], pos[2] - a[2][3]];
        let m = [
            [a[0][0], a[0][1], a[0][2]],
            [a[1][0], a[1][1], a[1][2]],
            [a[2][0], a[2][1], a[2][2]],
        ];
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        debug_assert!(det.abs() > 1e-12, "header affine is singular");
        let inv_det = 1.0 / det;
        let cof = [
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
            ],
        ];
        [
            cof[0][0] * rel[0] + cof[0][1] * rel[1] + cof[0][2] * rel[2],
            cof[1][0] * rel[0] + cof[1][1] * rel[1] + cof[1][2] * rel[2],
            cof[2][0] * rel[0] + cof[2][1] * rel[1] + cof[2][2] * rel[2],
        ]
    }

    /// A header describing a 3D export sharing this header's grid: ndim
    /// truncated to 3, intensity scaling is not modelled here (exports are
    /// always written unscaled), consistent with the exports contract.
    pub fn as_export_grid(&self) -> Header {
        Header {
            affine: self.affine,
            size: self.size,
            volumes: 1,
            spacing: self.spacing,
            metadata: HashMap::new(),
        }
    }

    /// True iff two headers describe the same spatial grid (size and
    /// spacing), the check performed before accepting a mask or VST image
    /// alongside the primary input.
    pub fn grid_matches(&self, other: &Header) -> bool {
        self.size == other.size
            && self
                .spacing
                .iter()
                .zip(other.spacing.iter())
                .all(|(a, b)| (a - b).abs() < 1e-6)
    }
}
