//! CLI entry point wiring the engine end-to-end: read an input image, scan
//! it for noise level and rank, write the requested output maps.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use mppca_noise::estimator::Estimator;
use mppca_noise::exports::ExportFlags;
use mppca_noise::image::{Image, Mask};
use mppca_noise::kernel::{Cuboid, Kernel, Sphere};
use mppca_noise::precondition::{DemeanMode, DemodulationField, DemodulationMode, Preconditioner, PriorSigmaField};
use mppca_noise::subsample::Subsample;
use mppca_noise::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EstimatorArg {
    Exp1,
    Exp2,
    Med,
    Mrm2022,
    Mrm2023,
    Unity,
    Import,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DatatypeArg {
    Float32,
    Float64,
    ComplexFloat32,
    ComplexFloat64,
}

impl DatatypeArg {
    fn is_complex(self) -> bool {
        matches!(self, DatatypeArg::ComplexFloat32 | DatatypeArg::ComplexFloat64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DemeanArg {
    None,
    PerVolume,
    PerVoxel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DemodulateArg {
    None,
    Linear,
    Nonlinear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum KernelArg {
    Cuboid,
    Sphere,
}

/// Marchenko-Pastur PCA noise level estimation for diffusion MRI series.
#[derive(Parser, Debug)]
#[command(name = "mpnoise", version, about)]
struct Cli {
    /// Input diffusion-weighted image (engine-native raw + JSON sidecar).
    dwi: PathBuf,

    /// Output noise level map.
    noise: PathBuf,

    /// PCA working precision.
    #[arg(long, value_enum, default_value_t = DatatypeArg::Float32)]
    datatype: DatatypeArg,

    /// Noise estimator variant.
    #[arg(long, value_enum, default_value_t = EstimatorArg::Exp2)]
    estimator: EstimatorArg,

    /// Fixed sigma value (required when `--estimator` is not set to a
    /// fitting variant and a supplied level is desired instead).
    #[arg(long)]
    fixed_sigma: Option<f64>,

    /// Forced signal rank (used by the rank-forced workflow, set via
    /// `--rank-force` rather than `--estimator`, since forcing a rank is
    /// orthogonal to the fitted variants).
    #[arg(long)]
    rank_force: Option<usize>,

    /// Pre-estimated noise map, required when `--estimator import`.
    #[arg(long)]
    noise_in: Option<PathBuf>,

    /// Prior sigma field for variance-stabilising rescale.
    #[arg(long)]
    vst: Option<PathBuf>,

    /// Patch-selection kernel shape.
    #[arg(long, value_enum, default_value_t = KernelArg::Cuboid)]
    kernel: KernelArg,

    /// Cuboid half-extent per axis (ignored for `--kernel sphere`).
    #[arg(long, num_args = 3, default_values_t = [2isize, 2, 2])]
    cuboid_extent: Vec<isize>,

    /// Sphere target voxel count (ignored for `--kernel cuboid`).
    #[arg(long, default_value_t = 27)]
    sphere_count: usize,

    /// Subsample decimation factors.
    #[arg(long, num_args = 3, default_values_t = [2usize, 2, 2])]
    subsample: Vec<usize>,

    /// Mean-subtraction mode applied before PCA.
    #[arg(long, value_enum, default_value_t = DemeanArg::None)]
    demean: DemeanArg,

    /// Phase-demodulation mode applied before PCA (complex data only).
    #[arg(long, value_enum, default_value_t = DemodulateArg::None)]
    demodulate: DemodulateArg,

    /// Optional voxel mask.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Export the per-voxel signal rank maps.
    #[arg(long)]
    rank: bool,

    /// Export the per-patch max voxel distance map.
    #[arg(long)]
    max_dist: bool,

    /// Export the per-patch voxel count map.
    #[arg(long)]
    voxelcount: bool,

    /// Export the per-input-voxel patch count map.
    #[arg(long)]
    patchcount: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    configure_thread_pool()?;
    run(cli)
}

/// Thread count follows `RAYON_NUM_THREADS` when set, falling back to the
/// number of logical cores; rayon's global pool reads the same variable
/// itself, so this only needs to happen once up front for the log line.
fn configure_thread_pool() -> Result<()> {
    let threads = std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get);
    info!("using {threads} worker threads");
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    if cli.estimator == EstimatorArg::Import && cli.noise_in.is_none() {
        bail!("-estimator import requires a pre-estimated noise level image via --noise-in");
    }
    if cli.noise_in.is_some() && cli.estimator != EstimatorArg::Import {
        warn!("--noise-in has no effect unless --estimator import is specified");
    }

    match cli.datatype {
        DatatypeArg::Float32 => run_typed::<f32>(&cli),
        DatatypeArg::Float64 => run_typed::<f64>(&cli),
        DatatypeArg::ComplexFloat32 => run_typed::<num_complex::Complex32>(&cli),
        DatatypeArg::ComplexFloat64 => run_typed::<num_complex::Complex64>(&cli),
    }
}

fn run_typed<T>(cli: &Cli) -> Result<()>
where
    T: mppca_noise::tools::svdapprox::PatchScalar + mppca_noise::io::RawElement,
{
    let image: Image<T> = mppca_noise::io::read_image(&cli.dwi)
        .with_context(|| format!("reading input image {}", cli.dwi.display()))?;
    image.require_series().context("input image")?;
    info!(
        "loaded input image: size {:?}, {} volumes",
        image.spatial_size(),
        image.num_volumes()
    );

    let mask = match &cli.mask {
        Some(path) => {
            let mask_image: Image<f32> = mppca_noise::io::read_image(path)
                .with_context(|| format!("reading mask image {}", path.display()))?;
            if !mask_image.header().grid_matches(image.header()) {
                bail!("mask grid does not match input image grid");
            }
            let data = mask_image.data().mapv(|v| v != 0.0);
            Mask::new(mask_image.header().clone(), data.index_axis(ndarray::Axis(3), 0).to_owned())
        }
        None => Mask::all_true(image.header().clone()),
    };

    let subsample_factors: [usize; 3] = cli
        .subsample
        .clone()
        .try_into()
        .map_err(|_| anyhow::anyhow!("--subsample requires exactly 3 values"))?;
    let subsample = Subsample::new(image.header().clone(), subsample_factors);

    let halfvoxel = subsample.halfvoxel_offsets();
    let kernel: Box<dyn Kernel> = match cli.kernel {
        KernelArg::Cuboid => {
            let extents: [isize; 3] = cli
                .cuboid_extent
                .clone()
                .try_into()
                .map_err(|_| anyhow::anyhow!("--cuboid-extent requires exactly 3 values"))?;
            Box::new(Cuboid::new(image.header(), extents, halfvoxel).with_mask(mask))
        }
        KernelArg::Sphere => Box::new(Sphere::new(image.header(), cli.sphere_count, halfvoxel).with_mask(mask)),
    };

    let demean = match cli.demean {
        DemeanArg::None => DemeanMode::None,
        DemeanArg::PerVolume => DemeanMode::PerVolume,
        DemeanArg::PerVoxel => DemeanMode::PerVoxel,
    };
    let demodulate_mode = match cli.demodulate {
        DemodulateArg::None => DemodulationMode::None,
        DemodulateArg::Linear => DemodulationMode::Linear,
        DemodulateArg::Nonlinear => DemodulationMode::Nonlinear,
    };
    Preconditioner::validate_demodulation(demodulate_mode, cli.datatype.is_complex())
        .context("demodulation requested on real-valued input")?;
    let demodulation = (demodulate_mode != DemodulationMode::None)
        .then(|| DemodulationField::fit(&image, demodulate_mode));

    let vst = match &cli.vst {
        Some(path) => {
            let vst_image: Image<f32> = mppca_noise::io::read_image(path)
                .with_context(|| format!("reading VST prior image {}", path.display()))?;
            if !vst_image.header().grid_matches(image.header()) {
                bail!("--vst grid does not match input image grid");
            }
            Some(PriorSigmaField::new(vst_image))
        }
        None => None,
    };
    let preconditioner = Preconditioner::new(demean, demodulation, vst)?;

    let estimator = match cli.estimator {
        EstimatorArg::Exp1 => Estimator::Exp1,
        EstimatorArg::Exp2 => Estimator::Exp2,
        EstimatorArg::Med => Estimator::Med,
        EstimatorArg::Mrm2022 => Estimator::Mrm2022,
        EstimatorArg::Mrm2023 => Estimator::Mrm2023,
        EstimatorArg::Unity => Estimator::Unity,
        EstimatorArg::Import => Estimator::Import,
    };
    let estimator = if let Some(sigma) = cli.fixed_sigma {
        Estimator::Fixed { sigma2: sigma * sigma }
    } else if let Some(rank) = cli.rank_force {
        Estimator::Rank { rank }
    } else {
        estimator
    };

    let flags = ExportFlags {
        rank: cli.rank,
        max_dist: cli.max_dist,
        voxelcount: cli.voxelcount,
        patchcount: cli.patchcount,
        sum_optshrink: false,
        sum_aggregation: cli.patchcount,
    };
    let mut exports = mppca_noise::exports::Exports::new(image.header().clone(), subsample.header().clone(), flags);

    if estimator.is_import() {
        bail!("the import estimator is not yet wired to a file-backed noise map reader in this CLI");
    }

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("cancellation requested, finishing the current row before stopping");
        handler_token.cancel();
    })
    .context("installing Ctrl+C handler")?;

    // The noise map is only written once, after the full scan completes, so
    // a cancelled scan leaves no output file behind to clean up here.
    mppca_noise::estimate::run_scan(&image, &subsample, kernel.as_ref(), &preconditioner, &estimator, &mut exports, Some(&cancel))?;

    let noise_image = Image::new(
        subsample.header().as_export_grid(),
        ndarray::Array4::from_shape_fn(
            (subsample.header().size[0], subsample.header().size[1], subsample.header().size[2], 1),
            |(x, y, z, _)| {
                let size = subsample.header().size;
                exports.noise_out.as_ref().unwrap()[(z * size[1] + y) * size[0] + x]
            },
        ),
    )?;
    mppca_noise::io::write_image(&cli.noise, &noise_image)
        .with_context(|| format!("writing noise map to {}", cli.noise.display()))?;

    info!("scan complete, noise map written to {}", cli.noise.display());
    Ok(())
}
