//! Import "estimator": not a fit at all. The noise map is a user-supplied
//! image, resampled onto the subsample grid; [`Estimator::evaluate`] never
//! runs a per-patch computation for this variant (see the `Import` arm of
//! its match), and the driver instead copies through this field directly.

use crate::header::Header;

/// A previously estimated noise-level map supplied via `-noise_in`.
pub struct ImportedNoise {
    field: ndarray::Array3<f32>,
    header: Header,
}

impl ImportedNoise {
    pub fn new(field: ndarray::Array3<f32>, header: Header) -> Self {
        ImportedNoise { field, header }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Nearest-voxel lookup on the field's own grid; the driver is
    /// responsible for mapping subsample-grid coordinates onto it.
    pub fn sample(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.field.get([x, y, z]).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_returns_stored_value() {
        let header = Header::new([2, 2, 2], 4, [1.0, 1.0, 1.0]);
        let field = ndarray::Array3::from_elem((2, 2, 2), 0.5f32);
        let imported = ImportedNoise::new(field, header);
        assert_eq!(imported.sample(0, 0, 0), Some(0.5));
        assert_eq!(imported.sample(5, 5, 5), None);
    }
}
