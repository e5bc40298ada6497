//! The abstract image accessor the rest of the engine is specified against.
//!
//! Real neuroimaging file formats, gradient tables and VST file I/O are out
//! of scope; this is the in-memory backing the core algorithms operate on.
//! `T` ranges over `f32`, `f64`, `num_complex::Complex32/64`.

use ndarray::Array4;

use crate::header::Header;

/// A 4D scalar field over (x, y, z, volume), M = `size(3)` >= 2.
#[derive(Clone, Debug)]
pub struct Image<T> {
    header: Header,
    data: Array4<T>,
}

impl<T: Clone> Image<T> {
    /// Build an image from raw data, checking that the header's spatial size
    /// matches the data shape. This does not enforce a minimum volume count:
    /// `Image<T>` also backs single-channel grids (masks, exported noise
    /// maps, VST prior fields) with exactly one volume. Use
    /// [`Image::require_series`] where the `ndim == 4, size(3) >= 2` input
    /// diffusion-series invariant actually applies.
    pub fn new(header: Header, data: Array4<T>) -> crate::error::Result<Self> {
        let shape = data.shape();
        if shape[0] != header.size[0] || shape[1] != header.size[1] || shape[2] != header.size[2] {
            return Err(crate::error::EngineError::InputShape(format!(
                "header size {:?} does not match data shape {:?}",
                header.size,
                &shape[..3]
            )));
        }
        Ok(Image { header, data })
    }

    /// Checks the diffusion-series input-shape requirement: at least 2
    /// volumes. Called explicitly by the reader of the primary input image,
    /// not by every `Image<T>` construction (see [`Image::new`]).
    pub fn require_series(&self) -> crate::error::Result<()> {
        if self.num_volumes() < 2 {
            return Err(crate::error::EngineError::InputShape(format!(
                "input image must carry at least 2 volumes, found {}",
                self.num_volumes()
            )));
        }
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// M, the number of volumes.
    pub fn num_volumes(&self) -> usize {
        self.data.shape()[3]
    }

    pub fn spatial_size(&self) -> [usize; 3] {
        self.header.size
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize, v: usize) -> T {
        self.data[[x, y, z, v]].clone()
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, v: usize, value: T) {
        self.data[[x, y, z, v]] = value;
    }

    /// The full volume-column at (x, y, z): one value per volume.
    pub fn column(&self, x: usize, y: usize, z: usize) -> Vec<T> {
        (0..self.num_volumes())
            .map(|v| self.data[[x, y, z, v]].clone())
            .collect()
    }

    pub fn set_column(&mut self, x: usize, y: usize, z: usize, values: &[T]) {
        debug_assert_eq!(values.len(), self.num_volumes());
        for (v, value) in values.iter().enumerate() {
            self.data[[x, y, z, v]] = value.clone();
        }
    }

    pub fn data(&self) -> &Array4<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array4<T> {
        &mut self.data
    }

    pub fn in_bounds(&self, x: isize, y: isize, z: isize) -> bool {
        let s = self.header.size;
        x >= 0 && y >= 0 && z >= 0 && (x as usize) < s[0] && (y as usize) < s[1] && (z as usize) < s[2]
    }
}

/// A per-voxel boolean mask sharing a grid with an [`Image`].
#[derive(Clone, Debug)]
pub struct Mask {
    header: Header,
    data: ndarray::Array3<bool>,
}

impl Mask {
    pub fn new(header: Header, data: ndarray::Array3<bool>) -> Self {
        Mask { header, data }
    }

    pub fn all_true(header: Header) -> Self {
        let size = header.size;
        let data = ndarray::Array3::from_elem((size[0], size[1], size[2]), true);
        Mask { header, data }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn is_set(&self, x: usize, y: usize, z: usize) -> bool {
        self.data[[x, y, z]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> Header {
        Header::new([4, 4, 4], 8, [1.0, 1.0, 1.0])
    }

    #[test]
    fn single_volume_grids_construct_but_fail_series_check() {
        let h = Header::new([4, 4, 4], 1, [1.0, 1.0, 1.0]);
        let data = Array4::<f32>::zeros((4, 4, 4, 1));
        let img = Image::new(h, data).unwrap();
        assert!(img.require_series().is_err());
    }

    #[test]
    fn multi_volume_image_passes_series_check() {
        let img = Image::new(test_header(), Array4::<f32>::zeros((4, 4, 4, 8))).unwrap();
        assert!(img.require_series().is_ok());
    }

    #[test]
    fn column_round_trips() {
        let h = test_header();
        let data = Array4::<f32>::zeros((4, 4, 4, 8));
        let mut img = Image::new(h, data).unwrap();
        let vals: Vec<f32> = (0..8).map(|v| v as f32).collect();
        img.set_column(1, 2, 3, &vals);
        assert_eq!(img.column(1, 2, 3), vals);
    }

    #[test]
    fn mask_defaults_to_all_true() {
        let h = test_header();
        let mask = Mask::all_true(h);
        assert!(mask.is_set(0, 0, 0));
        assert!(mask.is_set(3, 3, 3));
    }
}
