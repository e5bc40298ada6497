//! Optional iterative refinement: re-run the scan, feeding the previous
//! iteration's noise map back in as a variance-stabilising prior, until the
//! mean noise estimate stops moving or an iteration cap is hit.

use ndarray::Array4;

use crate::error::{CancellationToken, Result};
use crate::estimator::Estimator;
use crate::exports::{ExportFlags, Exports};
use crate::header::Header;
use crate::image::Image;
use crate::kernel::Kernel;
use crate::precondition::{DemeanMode, Preconditioner, PriorSigmaField};
use crate::subsample::Subsample;
use crate::tools::svdapprox::PatchScalar;

#[derive(Clone, Copy, Debug)]
pub struct IterativeConfig {
    pub max_iterations: usize,
    /// Stop once `|mean(sigma_i) - mean(sigma_{i-1})| / mean(sigma_{i-1})`
    /// falls below this fraction.
    pub convergence_fraction: f64,
}

impl Default for IterativeConfig {
    fn default() -> Self {
        IterativeConfig {
            max_iterations: 5,
            convergence_fraction: 0.01,
        }
    }
}

fn mean_finite(values: &[f32]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().filter(|v| v.is_finite()).map(|v| *v as f64).collect();
    if finite.is_empty() {
        None
    } else {
        Some(finite.iter().sum::<f64>() / finite.len() as f64)
    }
}

fn noise_out_as_image(noise_out: &[f32], header: &Header) -> Image<f32> {
    let size = header.size;
    let data = Array4::from_shape_fn((size[0], size[1], size[2], 1), |(x, y, z, _)| {
        noise_out[(z * size[1] + y) * size[0] + x]
    });
    Image::new(header.as_export_grid(), data).expect("subsample grid matches the export header's spatial size")
}

/// Runs up to `config.max_iterations` scans, returning the final `Exports`
/// and the number of iterations actually performed.
///
/// Each iteration feeds the previous iteration's noise map in as the prior
/// for a fresh [`Preconditioner`] (demean-only on the first pass, demean
/// plus VST from the second pass on): the prior both divides the data
/// before PCA and is multiplied back into that iteration's noise map
/// afterward, so successive iterations never compound a stale rescale.
/// `cancel`, if given, is checked between iterations and is also threaded
/// into each scan so it can stop mid-scan; a cancelled run returns
/// `Err(EngineError::Cancelled)` with no `Exports` to discard by the caller
/// beyond what they already hold.
pub fn run_iterative<T: PatchScalar>(
    image: &Image<T>,
    subsample: &Subsample,
    kernel: &dyn Kernel,
    demean: DemeanMode,
    estimator: &Estimator,
    flags: ExportFlags,
    config: IterativeConfig,
    cancel: Option<&CancellationToken>,
) -> Result<(Exports, usize)> {
    let mut vst_field: Option<PriorSigmaField> = None;
    let mut prev_mean: Option<f64> = None;
    let mut exports = Exports::new(image.header().clone(), subsample.header().clone(), flags);

    let mut completed = 0;
    for _ in 0..config.max_iterations.max(1) {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(crate::error::EngineError::Cancelled);
        }

        let preconditioner = Preconditioner::new(demean, None, vst_field.take())
            .expect("demean/VST preconditioner never fails to construct");
        exports = Exports::new(image.header().clone(), subsample.header().clone(), flags);
        crate::estimate::run_scan(image, subsample, kernel, &preconditioner, estimator, &mut exports, cancel)?;
        completed += 1;

        let noise_out = exports.noise_out.as_ref().expect("noise_out is always allocated");
        let Some(mean) = mean_finite(noise_out) else { break };
        if let Some(prev) = prev_mean {
            if prev > 0.0 && ((mean - prev).abs() / prev) < config.convergence_fraction {
                break;
            }
        }
        prev_mean = Some(mean);
        vst_field = Some(PriorSigmaField::new(noise_out_as_image(noise_out, subsample.header())));
    }

    Ok((exports, completed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Cuboid;
    use ndarray::Array4 as NdArray4;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn converges_within_the_iteration_cap() {
        let size = [10, 10, 10];
        let m = 20;
        let header = Header::new(size, m, [2.0, 2.0, 2.0]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let data = NdArray4::<f64>::from_shape_fn((size[0], size[1], size[2], m), |_| normal.sample(&mut rng));
        let image = Image::new(header.clone(), data).unwrap();
        let subsample = Subsample::new(header.clone(), [3, 3, 3]);
        let kernel = Cuboid::new(&header, [2, 2, 2], subsample.halfvoxel_offsets());
        let estimator = Estimator::Exp2;
        let config = IterativeConfig {
            max_iterations: 4,
            convergence_fraction: 0.2,
        };

        let (exports, iterations) = run_iterative(
            &image,
            &subsample,
            &kernel,
            DemeanMode::None,
            &estimator,
            ExportFlags::default(),
            config,
            None,
        )
        .unwrap();

        assert!(iterations >= 1 && iterations <= 4);
        assert!(exports.noise_out.unwrap().iter().any(|v| v.is_finite()));
    }
}
