//! Typed, optional output maps written by the estimate driver.
//!
//! Per-patch outputs (`noise_out`, `max_dist`, `voxelcount`) live on the
//! subsample grid and each patch owns exactly one coordinate, so plain
//! writes are race-free. `rank_output` names the input grid in the export
//! table even though it is a per-patch quantity; the driver resolves this by
//! writing it at the single input voxel that is the patch centre (see
//! DESIGN.md). `patchcount`, `rank_input`, and `sum_aggregation` are touched
//! by every patch covering a given input voxel and need atomic updates.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::header::Header;

/// A `u16` counter array with atomic per-element increment, backing
/// `patchcount` and `rank_input`.
pub struct AtomicCounterGrid {
    data: Vec<AtomicU32>,
    size: [usize; 3],
}

impl AtomicCounterGrid {
    pub fn new(size: [usize; 3]) -> Self {
        let len = size[0] * size[1] * size[2];
        AtomicCounterGrid {
            data: (0..len).map(|_| AtomicU32::new(0)).collect(),
            size,
        }
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.size[1] + y) * self.size[0] + x
    }

    pub fn add(&self, x: usize, y: usize, z: usize, delta: u32) {
        self.data[self.index(x, y, z)].fetch_add(delta, Ordering::Relaxed);
    }

    /// Saturating clamp to `max`, used for `rank_input` after demeaning
    /// inflates every accumulated count by one.
    pub fn clamp_all(&self, max: u32) {
        for cell in &self.data {
            let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.min(max)));
        }
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> u32 {
        self.data[self.index(x, y, z)].load(Ordering::Relaxed)
    }

    pub fn to_u16_vec(&self) -> Vec<u16> {
        self.data.iter().map(|c| c.load(Ordering::Relaxed).min(u16::MAX as u32) as u16).collect()
    }
}

/// A bit-reinterpreted `f32` accumulator array with atomic float add,
/// backing `sum_aggregation`.
pub struct AtomicFloatGrid {
    data: Vec<AtomicU64>,
    size: [usize; 3],
}

impl AtomicFloatGrid {
    pub fn new(size: [usize; 3]) -> Self {
        let len = size[0] * size[1] * size[2];
        AtomicFloatGrid {
            data: (0..len).map(|_| AtomicU64::new(0f64.to_bits())).collect(),
            size,
        }
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.size[1] + y) * self.size[0] + x
    }

    pub fn add(&self, x: usize, y: usize, z: usize, delta: f64) {
        let cell = &self.data[self.index(x, y, z)];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        f64::from_bits(self.data[self.index(x, y, z)].load(Ordering::Relaxed))
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data
            .iter()
            .map(|c| f64::from_bits(c.load(Ordering::Relaxed)) as f32)
            .collect()
    }
}

/// Bundle of optional output maps the estimate driver may be asked to
/// populate, sized against either the input grid or the subsample grid.
pub struct Exports {
    pub input_header: Header,
    pub subsample_header: Header,

    pub noise_out: Option<Vec<f32>>,
    pub sum_optshrink: Option<Vec<f32>>,
    pub max_dist: Option<Vec<f32>>,
    pub voxelcount: Option<Vec<u16>>,

    pub rank_input: Option<AtomicCounterGrid>,
    pub rank_output: Option<Vec<f32>>,
    pub patchcount: Option<AtomicCounterGrid>,
    pub sum_aggregation: Option<AtomicFloatGrid>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExportFlags {
    pub rank: bool,
    pub max_dist: bool,
    pub voxelcount: bool,
    pub patchcount: bool,
    pub sum_optshrink: bool,
    pub sum_aggregation: bool,
}

impl Exports {
    pub fn new(input_header: Header, subsample_header: Header, flags: ExportFlags) -> Self {
        let ss_len = subsample_header.size[0] * subsample_header.size[1] * subsample_header.size[2];
        let in_size = input_header.size;
        Exports {
            noise_out: Some(vec![f32::NAN; ss_len]),
            sum_optshrink: flags.sum_optshrink.then(|| vec![0.0; ss_len]),
            max_dist: flags.max_dist.then(|| vec![f32::NAN; ss_len]),
            voxelcount: flags.voxelcount.then(|| vec![0u16; ss_len]),
            rank_input: flags.rank.then(|| AtomicCounterGrid::new(in_size)),
            rank_output: flags.rank.then(|| vec![f32::NAN; in_size[0] * in_size[1] * in_size[2]]),
            patchcount: flags.patchcount.then(|| AtomicCounterGrid::new(in_size)),
            sum_aggregation: flags.sum_aggregation.then(|| AtomicFloatGrid::new(in_size)),
            input_header,
            subsample_header,
        }
    }

    fn ss_index(&self, q: [isize; 3]) -> usize {
        let size = self.subsample_header.size;
        (q[2] as usize * size[1] + q[1] as usize) * size[0] + q[0] as usize
    }

    /// `None` when `p` falls outside the input grid: the subsample origin
    /// formula can place the last row's notional centre one block beyond
    /// the input bounds when the size isn't evenly divisible by the factor.
    fn in_index(&self, p: [isize; 3]) -> Option<usize> {
        let size = self.input_header.size;
        if (0..3).any(|i| p[i] < 0 || p[i] as usize >= size[i]) {
            return None;
        }
        Some((p[2] as usize * size[1] + p[1] as usize) * size[0] + p[0] as usize)
    }

    pub fn write_noise(&mut self, q: [isize; 3], sigma: f32) {
        let idx = self.ss_index(q);
        if let Some(buf) = &mut self.noise_out {
            buf[idx] = sigma;
        }
    }

    pub fn write_max_dist(&mut self, q: [isize; 3], value: f32) {
        let idx = self.ss_index(q);
        if let Some(buf) = &mut self.max_dist {
            buf[idx] = value;
        }
    }

    pub fn write_voxelcount(&mut self, q: [isize; 3], n: u16) {
        let idx = self.ss_index(q);
        if let Some(buf) = &mut self.voxelcount {
            buf[idx] = n;
        }
    }

    pub fn write_rank_output_at_centre(&mut self, centre: [isize; 3], rank: f32) {
        let Some(idx) = self.in_index(centre) else { return };
        if let Some(buf) = &mut self.rank_output {
            buf[idx] = rank;
        }
    }

    /// Post-scan: if demeaning was active, every accumulated `rank_input`
    /// count is incremented by one (clamped to M).
    pub fn bump_rank_input_for_demean(&self, m: usize) {
        if let Some(grid) = &self.rank_input {
            for x in 0..self.input_header.size[0] {
                for y in 0..self.input_header.size[1] {
                    for z in 0..self.input_header.size[2] {
                        grid.add(x, y, z, 1);
                    }
                }
            }
            grid.clamp_all(m as u32);
        }
    }

    /// Post-scan: multiply the noise map by the interpolated VST field.
    pub fn apply_vst_rescale(&mut self, vst: &dyn crate::estimator::VstLookup) {
        let Some(buf) = &mut self.noise_out else { return };
        let header = &self.subsample_header;
        let size = header.size;
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    let scanner = header.voxel_to_scanner([x as f64, y as f64, z as f64]);
                    if let Some(prior) = vst.sample(scanner) {
                        let idx = (z * size[1] + y) * size[0] + x;
                        if buf[idx].is_finite() {
                            buf[idx] *= prior as f32;
                        }
                    }
                }
            }
        }
    }
}
