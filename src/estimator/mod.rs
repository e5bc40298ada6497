//! Noise level estimators: given a patch's sorted eigenspectrum, decide how
//! many components are signal and fit the Marchenko-Pastur noise variance
//! over the rest.
//!
//! Dispatch is a tagged enum rather than a trait object: the set of
//! estimators is closed, chosen once per run from the CLI, and keeping the
//! match concrete lets the inner per-patch loop stay branch-free across
//! estimator calls within a single scan.

pub mod geometry;

mod exp;
mod fixed;
mod import;
mod med;
mod mrm;
mod rank;
mod unity;

pub use exp::ExpVersion;

use ndarray::Array1;

/// Outcome of fitting one patch's eigenspectrum.
///
/// `sigma2` is signaling-NaN until a valid fit is found; `is_valid` mirrors
/// the source library's `operator bool() const { return std::isfinite(sigma2); }`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorResult {
    /// Number of components assigned to the noise bulk (0..=min(m,n)).
    pub cutoff_p: usize,
    /// Estimated noise variance.
    pub sigma2: f64,
    /// Upper edge of the fitted Marchenko-Pastur bulk.
    pub lamplus: f64,
}

impl EstimatorResult {
    pub fn invalid() -> Self {
        EstimatorResult {
            cutoff_p: 0,
            sigma2: f64::NAN,
            lamplus: f64::NAN,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.sigma2.is_finite()
    }
}

/// A previously-estimated, spatially varying noise level, sampled at a
/// scanner-space position. Used by [`Estimator::Fixed`] to rescale a
/// supplied sigma against the variance-stabilising transform that was
/// applied to the data before PCA.
pub trait VstLookup: Send + Sync {
    /// Returns `None` if `pos` falls outside the field's support.
    fn sample(&self, pos: [f64; 3]) -> Option<f64>;
}

/// Selects which noise estimator a scan uses. Chosen once per run.
#[derive(Clone, Debug)]
pub enum Estimator {
    /// Veraart et al. (2016).
    Exp1,
    /// Cordero-Grande et al. (2019); the default.
    Exp2,
    /// Olesen et al. (2022): downward sweep from the top of the spectrum.
    Mrm2022,
    /// Christiaens et al. (2023): downward sweep with an explicit
    /// monotonicity fence on the predicted MP edge.
    Mrm2023,
    /// Gavish and Donoho (2014) median-eigenvalue estimator.
    Med,
    /// A user-supplied noise level, optionally rescaled by a VST field.
    Fixed { sigma2: f64 },
    /// Assumes the data were already normalised to unit noise variance.
    Unity,
    /// Forces a fixed signal rank.
    Rank { rank: usize },
    /// Passes through a previously computed noise map; no per-patch fit.
    Import,
}

impl Estimator {
    /// Evaluate this estimator against one patch's sorted ascending
    /// singular values.
    ///
    /// `m` is the number of volumes, `n` the number of voxels in the patch,
    /// `rp` the preconditioner rank deficit, `pos` the patch centre in
    /// scanner space, and `vst` an optional prior noise field (only
    /// consulted by [`Estimator::Fixed`]).
    ///
    /// [`Estimator::Import`] always returns [`EstimatorResult::invalid`]:
    /// the driver short-circuits that case before reaching the PCA stage.
    pub fn evaluate(
        &self,
        s: &Array1<f64>,
        m: usize,
        n: usize,
        rp: usize,
        pos: [f64; 3],
        vst: Option<&dyn VstLookup>,
    ) -> EstimatorResult {
        match self {
            Estimator::Exp1 => exp::evaluate(s, m, n, rp, ExpVersion::V1),
            Estimator::Exp2 => exp::evaluate(s, m, n, rp, ExpVersion::V2),
            Estimator::Mrm2022 => mrm::evaluate(s, m, n, rp),
            Estimator::Mrm2023 => mrm::evaluate(s, m, n, rp),
            Estimator::Med => med::evaluate(s, m, n, rp),
            Estimator::Fixed { sigma2 } => fixed::evaluate(*sigma2, s, m, n, rp, pos, vst),
            Estimator::Unity => unity::evaluate(s, m, n, rp),
            Estimator::Rank { rank } => rank::evaluate(*rank, s, m, n, rp),
            Estimator::Import => EstimatorResult::invalid(),
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(self, Estimator::Import)
    }
}
