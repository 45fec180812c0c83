//! The per-subject workflow: load -> fit -> seed -> trace -> filter.

use std::fmt;
use std::path::Path;

use ndarray::{Array3, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sphere::Sphere;

use crate::gradients::{GradientError, GradientTable};
use crate::io::nii::{self, LoadError};
use crate::mask::wm_mask;
use crate::peaks::PeakField;
use crate::recon::{csa::CsaModel, csd, OdfFit, ReconError, ReconMethod, SH_ORDER};
use crate::seed::seeds_from_mask;
use crate::streamline::{longer_than, Streamline, MIN_POINTS};
use crate::track::{
    self, pmf_from_fit, BinaryStoppingCriterion, ClosestPeakGetter, ProbabilisticGetter,
    TrackingMethod, TrackingParams,
};
use crate::types::Dim3_u;

#[derive(Debug)]
pub enum PipelineError {
    Load(LoadError),
    Gradients(GradientError),
    Recon(ReconError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineError::Load(e) => write!(f, "{e}"),
            PipelineError::Gradients(e) => write!(f, "{e}"),
            PipelineError::Recon(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Load(e) => Some(e),
            PipelineError::Gradients(e) => Some(e),
            PipelineError::Recon(e) => Some(e),
        }
    }
}

impl From<LoadError> for PipelineError {
    fn from(e: LoadError) -> Self { Self::Load(e) }
}
impl From<GradientError> for PipelineError {
    fn from(e: GradientError) -> Self { Self::Gradients(e) }
}
impl From<ReconError> for PipelineError {
    fn from(e: ReconError) -> Self { Self::Recon(e) }
}

#[derive(Clone, Copy, Debug)]
pub struct TractographyParams {
    pub recon: ReconMethod,
    pub tracking: TrackingMethod,
    /// seeds per white-matter voxel
    pub seed_density: usize,
    pub step_size: f32,
    pub max_angle_deg: f32,
    /// streamlines with point count <= this are dropped
    pub min_points: usize,
    /// fixed RNG seed for reproducible runs; `None` seeds from entropy
    pub rng_seed: Option<u64>,
}

impl Default for TractographyParams {
    fn default() -> Self {
        Self {
            recon: ReconMethod::Csd,
            tracking: TrackingMethod::Prob,
            seed_density: 20,
            step_size: track::STEP_SIZE,
            max_angle_deg: track::MAX_ANGLE_DEG,
            min_points: MIN_POINTS,
            rng_seed: None,
        }
    }
}

pub struct TractographyOutput {
    pub streamlines: Vec<Streamline>,
    /// spatial shape of the subject's volume, for the tractogram header
    pub dim: Dim3_u,
}

/// Load one subject's inputs: diffusion volume, gradient table, white-matter
/// mask. Fails on unreadable files and on any shape disagreement.
pub fn load_data(
    fdwi: &Path,
    fbval: &Path,
    fbvec: &Path,
    fwmparc: &Path,
) -> Result<(Array4<f32>, GradientTable, Array3<bool>), PipelineError> {
    let dwi = nii::load_4d(fdwi)?;
    let gtab = GradientTable::from_files(fbval, fbvec)?;
    let wmparc = nii::load_3d(fwmparc)?;
    let mask = wm_mask(&wmparc);

    // surface the invariants here rather than deep inside a fit
    crate::recon::check_shapes(&dwi, &mask, gtab.len())?;
    Ok((dwi, gtab, mask))
}

/// The whole per-subject pipeline, file paths in, filtered streamlines out.
pub fn run_tractography(
    fdwi: &Path,
    fbval: &Path,
    fbvec: &Path,
    fwmparc: &Path,
    params: TractographyParams,
) -> Result<TractographyOutput, PipelineError> {
    let (dwi, gtab, mask) = load_data(fdwi, fbval, fbvec, fwmparc)?;
    run_on_data(&dwi, &gtab, &mask, params)
}

/// Same pipeline, starting from already-loaded arrays.
pub fn run_on_data(
    dwi: &Array4<f32>,
    gtab: &GradientTable,
    mask: &Array3<bool>,
    params: TractographyParams,
) -> Result<TractographyOutput, PipelineError> {
    let sph = Sphere::with_default_directions();
    let stop = BinaryStoppingCriterion::new(mask);

    let fit = fit_model(dwi, gtab, mask, &sph, params.recon)?;

    let mut rng = match params.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let seeds = seeds_from_mask(mask, params.seed_density, &mut rng);

    let tracking = TrackingParams { step_size: params.step_size, ..TrackingParams::default() };
    let raw = match params.tracking {
        TrackingMethod::Det => {
            println!("Obtaining peaks from model...");
            let field = PeakField::from_fit(&fit, mask, &sph);
            let mut getter = ClosestPeakGetter::new(&field, params.max_angle_deg);
            track::track(&mut getter, &stop, &seeds, tracking)
        }
        TrackingMethod::Prob => {
            println!("Preparing probabilistic tracking...");
            let pmf = pmf_from_fit(&fit, &sph);
            let mut getter = ProbabilisticGetter::new(&pmf, params.max_angle_deg, rng);
            track::track(&mut getter, &stop, &seeds, tracking)
        }
    };

    let (nx, ny, nz) = mask.dim();
    Ok(TractographyOutput {
        streamlines: longer_than(params.min_points, raw),
        dim: [nx, ny, nz],
    })
}

fn fit_model(
    dwi: &Array4<f32>,
    gtab: &GradientTable,
    mask: &Array3<bool>,
    sph: &Sphere,
    method: ReconMethod,
) -> Result<OdfFit, ReconError> {
    match method {
        ReconMethod::Csd => {
            println!("Fitting CSD model...");
            println!("Estimating recursive response...");
            let response = csd::recursive_response(gtab, dwi, mask, sph)?;
            csd::CsdModel::new(gtab, &response, SH_ORDER).fit(dwi, mask)
        }
        ReconMethod::Csa => {
            println!("Fitting CSA ODF model...");
            CsaModel::new(gtab, SH_ORDER).fit(dwi, mask)
        }
    }
}
