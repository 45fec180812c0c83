//! Probabilistic direction getter: each step's direction is drawn from the
//! voxel's ODF probability mass over a fixed direction set.
//!
//! Construction is a two-strategy resolution. Strategy A builds the source
//! directly from the fitted spherical-harmonic coefficients and fails on the
//! two enumerable ways a coefficient block can be unusable (width mismatch
//! against the basis, non-finite values). Strategy B, the dependable path,
//! evaluates the ODF over the sphere and clips negatives to zero. The
//! fallback is an inspected `Result`, not a caught panic.

use ndarray::{Array2, Array4};
use ordered_float::OrderedFloat;
use rand::Rng;

use sphere::Sphere;

use crate::recon::OdfFit;
use crate::track::{nearest_voxel, DirectionGetter, MAX_ANGLE_DEG};
use crate::types::{Dim3_u, Index3_u, Point, Vector};

#[derive(Debug, PartialEq, Eq)]
pub enum ShCoeffError {
    CoefficientMismatch { expected: usize, got: usize },
    NonFiniteCoefficients,
}

impl std::fmt::Display for ShCoeffError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ShCoeffError::CoefficientMismatch { expected, got } =>
                write!(f, "basis has {expected} functions but the fit carries {got} coefficients"),
            ShCoeffError::NonFiniteCoefficients =>
                write!(f, "fit contains non-finite coefficients"),
        }
    }
}

impl std::error::Error for ShCoeffError {}

#[derive(Debug)]
enum Source {
    /// strategy A: probability mass evaluated on demand from coefficients
    ShCoeff { coeff: Array4<f32>, basis: Array2<f32> },
    /// strategy B: materialized, clipped probability mass
    Sampled(Array4<f32>),
}

/// Per-voxel probability mass over the directions of a `Sphere`.
#[derive(Debug)]
pub struct PmfField {
    source: Source,
    dirs: Vec<Vector>,
    dim: Dim3_u,
}

impl PmfField {

    /// Strategy A. Validates that the coefficient block actually matches the
    /// basis; everything else about the fit has already been vetted upstream.
    pub fn from_sh_coeff(fit: &OdfFit, sph: &Sphere) -> Result<Self, ShCoeffError> {
        let expected = fit.n_coefficients();
        let got = fit.coeff.dim().3;
        if got != expected {
            return Err(ShCoeffError::CoefficientMismatch { expected, got });
        }
        if fit.coeff.iter().any(|c| !c.is_finite()) {
            return Err(ShCoeffError::NonFiniteCoefficients);
        }
        let b = sphere::sh_basis(fit.order, sph);
        let mut basis = Array2::zeros((sph.len(), expected));
        for row in 0..sph.len() {
            for col in 0..expected {
                basis[(row, col)] = b[(row, col)] as f32;
            }
        }
        Ok(Self {
            source: Source::ShCoeff { coeff: fit.coeff.clone(), basis },
            dirs: f32_dirs(sph),
            dim: fit.spatial_dim(),
        })
    }

    /// Strategy B: sample the ODF over the sphere and clip negative lobes
    /// (and anything non-finite) to zero.
    pub fn from_odf(fit: &OdfFit, sph: &Sphere) -> Self {
        let mut pmf = fit.odf_field(sph);
        pmf.mapv_inplace(|v| v.max(0.0));
        Self {
            source: Source::Sampled(pmf),
            dirs: f32_dirs(sph),
            dim: fit.spatial_dim(),
        }
    }

    pub fn dim(&self) -> Dim3_u { self.dim }

    pub fn n_dirs(&self) -> usize { self.dirs.len() }

    pub fn dirs(&self) -> &[Vector] { &self.dirs }

    /// Clipped probability mass at one voxel.
    pub fn pmf_at(&self, [x, y, z]: Index3_u) -> Vec<f32> {
        match &self.source {
            Source::ShCoeff { coeff, basis } => {
                let r = coeff.dim().3;
                (0..basis.nrows()).map(|row| {
                    let v: f32 = (0..r).map(|c| basis[(row, c)] * coeff[(x, y, z, c)]).sum();
                    v.max(0.0)
                }).collect()
            }
            Source::Sampled(pmf) => {
                (0..pmf.dim().3).map(|i| pmf[(x, y, z, i)]).collect()
            }
        }
    }

    /// Trilinear blend of the eight surrounding voxels' mass.
    fn pmf_interpolated(&self, p: Point) -> Vec<f32> {
        let [nx, ny, nz] = self.dim;
        let clamp = |v: f32, n: usize| (v.max(0.0) as usize).min(n - 1);
        let (x0, y0, z0) = (p.x.floor(), p.y.floor(), p.z.floor());
        let (fx, fy, fz) = (p.x - x0, p.y - y0, p.z - z0);

        let mut out = vec![0.0; self.n_dirs()];
        for (cx, cy, cz) in itertools::iproduct!(0..2, 0..2, 0..2) {
            let w = (if cx == 0 { 1.0 - fx } else { fx })
                  * (if cy == 0 { 1.0 - fy } else { fy })
                  * (if cz == 0 { 1.0 - fz } else { fz });
            if w == 0.0 { continue; }
            let idx = [clamp(x0 + cx as f32, nx),
                       clamp(y0 + cy as f32, ny),
                       clamp(z0 + cz as f32, nz)];
            for (o, v) in out.iter_mut().zip(self.pmf_at(idx)) {
                *o += w * v;
            }
        }
        out
    }
}

fn f32_dirs(sph: &Sphere) -> Vec<Vector> {
    sph.dirs().iter()
        .map(|d| Vector::new(d.x as f32, d.y as f32, d.z as f32))
        .collect()
}

/// The two-strategy resolution: try the coefficient path, fall back to the
/// sampled-ODF path on its enumerated failures.
pub fn pmf_from_fit(fit: &OdfFit, sph: &Sphere) -> PmfField {
    match PmfField::from_sh_coeff(fit, sph) {
        Ok(field) => field,
        Err(why) => {
            println!("Direction sampler: coefficient path unusable ({why}); sampling the ODF instead");
            PmfField::from_odf(fit, sph)
        }
    }
}

/// Mass below this fraction of the voxel's strongest direction is treated as
/// zero: ringing in the spherical-harmonic representation must not leak
/// low-probability directions into the sampler.
pub const PMF_THRESHOLD: f32 = 0.1;

pub struct ProbabilisticGetter<'f, R: Rng> {
    field: &'f PmfField,
    cos_max_angle: f32,
    rng: R,
}

impl<'f, R: Rng> ProbabilisticGetter<'f, R> {

    pub fn new(field: &'f PmfField, max_angle_deg: f32, rng: R) -> Self {
        Self { field, cos_max_angle: max_angle_deg.to_radians().cos(), rng }
    }

    pub fn with_default_angle(field: &'f PmfField, rng: R) -> Self {
        Self::new(field, MAX_ANGLE_DEG, rng)
    }
}

impl<R: Rng> DirectionGetter for ProbabilisticGetter<'_, R> {

    fn initial_direction(&mut self, seed: Point) -> Option<Vector> {
        let idx = nearest_voxel(seed, self.field.dim())?;
        let pmf = self.field.pmf_at(idx);
        let best = (0..pmf.len()).max_by_key(|&i| OrderedFloat(pmf[i]))?;
        if pmf[best] > 0.0 { Some(self.field.dirs[best]) } else { None }
    }

    fn next_direction(&mut self, point: Point, previous: Vector) -> Option<Vector> {
        let pmf = self.field.pmf_interpolated(point);
        let floor = PMF_THRESHOLD * pmf.iter().cloned().fold(0.0, f32::max);
        // forbid turns beyond the cone around the incoming direction
        let weights: Vec<f32> = pmf.iter().zip(&self.field.dirs)
            .map(|(&m, d)| if m > floor && d.dot(&previous) >= self.cos_max_angle { m } else { 0.0 })
            .collect();
        let total: f32 = weights.iter().sum();
        if !(total > 0.0) { return None; }

        let mut draw = self.rng.gen::<f32>() * total;
        for (i, &w) in weights.iter().enumerate() {
            draw -= w;
            if draw <= 0.0 { return Some(self.field.dirs[i]); }
        }
        // floating-point crumbs: take the last weighted direction
        weights.iter().rposition(|&w| w > 0.0).map(|i| self.field.dirs[i])
    }
}
