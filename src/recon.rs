//! Orientation reconstruction: fit a per-voxel model of local fiber
//! orientation to the diffusion signal. Two estimators are provided, both
//! producing the same spherical-harmonic representation:
//!
//! - `csa`: constant solid-angle ODF model, fitted directly from the
//!   gradient scheme.
//! - `csd`: constrained spherical deconvolution, calibrated first by a
//!   recursive single-fiber response estimation.

pub mod csa;
pub mod csd;

use std::fmt;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array3, Array4};

use crate::types::{Dim3_u, Index3_u};

/// Spherical-harmonic order used throughout the pipeline.
pub const SH_ORDER: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconMethod {
    /// Constrained spherical deconvolution with a recursively estimated
    /// response function
    Csd,
    /// Constant solid-angle ODF model
    Csa,
}

#[derive(Debug)]
pub enum ReconError {
    GradientCountMismatch { volumes: usize, gradients: usize },
    ShapeMismatch { volume: Dim3_u, mask: Dim3_u },
    /// The recursive response estimation ran out of iterations before the
    /// coefficients settled.
    ResponseDidNotConverge { iterations: usize },
    /// No voxel in the mask looked like a single fiber, so there is nothing
    /// to calibrate the response on.
    NoSingleFiberVoxels,
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ReconError::*;
        match self {
            GradientCountMismatch { volumes, gradients } =>
                write!(f, "diffusion volume has {volumes} measurements but the gradient table has {gradients}"),
            ShapeMismatch { volume, mask } =>
                write!(f, "volume shape {volume:?} does not match mask shape {mask:?}"),
            ResponseDidNotConverge { iterations } =>
                write!(f, "response function did not converge within {iterations} iterations"),
            NoSingleFiberVoxels =>
                write!(f, "no single-fiber voxels found for response estimation"),
        }
    }
}

impl std::error::Error for ReconError {}

/// A fitted orientation model: spherical-harmonic coefficients per voxel,
/// zero outside the fitted mask.
#[derive(Clone, Debug)]
pub struct OdfFit {
    /// (x, y, z, coefficient)
    pub coeff: Array4<f32>,
    pub order: usize,
}

impl OdfFit {

    pub fn n_coefficients(&self) -> usize {
        sphere::n_coefficients(self.order)
    }

    pub fn spatial_dim(&self) -> Dim3_u {
        let (x, y, z, _) = self.coeff.dim();
        [x, y, z]
    }

    /// ODF sample values at one voxel, given a basis matrix evaluated over
    /// the directions of interest (`sphere::sh_basis`).
    pub fn odf_at(&self, [x, y, z]: Index3_u, basis: &DMatrix<f64>) -> Vec<f64> {
        let r = self.coeff.dim().3;
        (0..basis.nrows()).map(|row| {
            (0..r).map(|c| basis[(row, c)] * self.coeff[(x, y, z, c)] as f64).sum()
        }).collect()
    }

    /// ODF evaluated on a whole sphere for every voxel: (x, y, z, direction).
    pub fn odf_field(&self, sph: &sphere::Sphere) -> Array4<f32> {
        let basis = sphere::sh_basis(self.order, sph);
        let [nx, ny, nz] = self.spatial_dim();
        let mut out = Array4::zeros((nx, ny, nz, sph.len()));
        for [x, y, z] in itertools::iproduct!(0..nx, 0..ny, 0..nz).map(|(x, y, z)| [x, y, z]) {
            for (i, v) in self.odf_at([x, y, z], &basis).into_iter().enumerate() {
                out[(x, y, z, i)] = v as f32;
            }
        }
        out
    }
}

// ----- shared fitting helpers ----------------------------------------------

/// Regularized pseudo-inverse `(BᵀB + diag(l²))⁻¹ Bᵀ`: least squares with a
/// Laplace-Beltrami penalty on the high degrees.
pub(crate) fn smooth_pinv(b: &DMatrix<f64>, l: &[f64]) -> DMatrix<f64> {
    let bt = b.transpose();
    let mut m = &bt * b;
    for (i, li) in l.iter().enumerate() {
        m[(i, i)] += li * li;
    }
    match m.clone().cholesky() {
        Some(chol) => chol.solve(&bt),
        // fall back to SVD when the normal matrix is numerically singular
        None => m.pseudo_inverse(1e-12).expect("pseudo-inverse of square matrix") * bt,
    }
}

/// Plain least squares via SVD.
pub(crate) fn lstsq(a: &DMatrix<f64>, b: &DVector<f64>) -> DVector<f64> {
    a.clone()
        .svd(true, true)
        .solve(b, 1e-12)
        .expect("SVD solve cannot fail when both factors are requested")
}

/// Indices of the mask-true voxels.
pub(crate) fn mask_indices(mask: &Array3<bool>) -> Vec<Index3_u> {
    let (nx, ny, nz) = mask.dim();
    itertools::iproduct!(0..nx, 0..ny, 0..nz)
        .filter(|&(x, y, z)| mask[(x, y, z)])
        .map(|(x, y, z)| [x, y, z])
        .collect()
}

/// Check the per-subject invariants shared by both estimators.
pub(crate) fn check_shapes(
    dwi: &Array4<f32>,
    mask: &Array3<bool>,
    n_gradients: usize,
) -> Result<(), ReconError> {
    let (nx, ny, nz, nq) = dwi.dim();
    if nq != n_gradients {
        return Err(ReconError::GradientCountMismatch { volumes: nq, gradients: n_gradients });
    }
    if (nx, ny, nz) != mask.dim() {
        let (mx, my, mz) = mask.dim();
        return Err(ReconError::ShapeMismatch { volume: [nx, ny, nz], mask: [mx, my, mz] });
    }
    Ok(())
}

/// Mean unweighted signal in one voxel; the normalization reference for the
/// diffusion-weighted measurements.
pub(crate) fn b0_mean(dwi: &Array4<f32>, [x, y, z]: Index3_u, b0s: &[usize]) -> f32 {
    b0s.iter().map(|&q| dwi[(x, y, z, q)]).sum::<f32>() / b0s.len() as f32
}

#[cfg(test)]
mod test_recon {
    use super::*;
    use float_eq::assert_float_eq;

    #[test]
    fn smooth_pinv_without_penalty_is_least_squares() {
        let b = DMatrix::from_row_slice(3, 2, &[1.0, 0.0,
                                                0.0, 1.0,
                                                1.0, 1.0]);
        let rhs = DVector::from_column_slice(&[1.0, 2.0, 3.0]);
        let x = smooth_pinv(&b, &[0.0, 0.0]) * &rhs;
        let y = lstsq(&b, &rhs);
        assert_float_eq!(x[0], y[0], abs <= 1e-10);
        assert_float_eq!(x[1], y[1], abs <= 1e-10);
    }

    #[test]
    fn penalty_shrinks_the_solution() {
        let b = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let rhs = DVector::from_column_slice(&[1.0, 1.0]);
        let free = smooth_pinv(&b, &[0.0, 0.0]) * &rhs;
        let tame = smooth_pinv(&b, &[0.0, 10.0]) * &rhs;
        assert_float_eq!(tame[0], free[0], abs <= 1e-10);
        assert!(tame[1].abs() < free[1].abs());
    }

    #[test]
    fn mask_indices_match_mask() {
        let mut mask = Array3::from_elem((2, 2, 2), false);
        mask[(0, 0, 1)] = true;
        mask[(1, 1, 0)] = true;
        assert_eq!(mask_indices(&mask), vec![[0, 0, 1], [1, 1, 0]]);
    }
}
