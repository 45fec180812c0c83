//! Constant solid-angle ODF model: the ODF's spherical-harmonic coefficients
//! come from a regularized fit of `log(-log(E))` of the normalized signal,
//! scaled by the Funk-Radon / Laplace-Beltrami eigenvalues.

use nalgebra::DMatrix;
use ndarray::{Array3, Array4};
use rayon::prelude::*;

use crate::gradients::GradientTable;
use crate::recon::{b0_mean, check_shapes, mask_indices, smooth_pinv, OdfFit, ReconError};

/// Signal ratios are clamped into this open interval before the double log.
const MIN_SIGNAL: f64 = 0.001;
const MAX_SIGNAL: f64 = 0.999;

/// Laplace-Beltrami smoothing weight for the coefficient fit.
const SMOOTH: f64 = 0.006;

pub struct CsaModel {
    /// coefficient rows x diffusion-weighted measurement columns
    fit_matrix: DMatrix<f64>,
    dwi: Vec<usize>,
    b0s: Vec<usize>,
    order: usize,
    n_gradients: usize,
}

impl CsaModel {

    pub fn new(gtab: &GradientTable, order: usize) -> Self {
        let dirs = gtab.dwi_dirs();
        let b = sphere::sh_basis_dirs(order, &dirs);
        let degrees = sphere::degrees(order);

        let penalty: Vec<f64> = degrees.iter()
            .map(|&l| SMOOTH.sqrt() * (l * (l + 1)) as f64)
            .collect();
        let mut fit_matrix = smooth_pinv(&b, &penalty);

        // Funk-Radon times the solid-angle Laplacian eigenvalue, per degree
        for (row, &l) in degrees.iter().enumerate() {
            let factor = sphere::legendre_p0(l) * -((l * (l + 1)) as f64)
                / (8.0 * std::f64::consts::PI);
            for col in 0..fit_matrix.ncols() {
                fit_matrix[(row, col)] *= factor;
            }
        }

        Self {
            fit_matrix,
            dwi: gtab.dwi_indices(),
            b0s: gtab.b0_indices(),
            order,
            n_gradients: gtab.len(),
        }
    }

    pub fn fit(&self, dwi: &Array4<f32>, mask: &Array3<bool>) -> Result<OdfFit, ReconError> {
        check_shapes(dwi, mask, self.n_gradients)?;

        let n_coeff = sphere::n_coefficients(self.order);
        let n0 = 0.5 / std::f64::consts::PI.sqrt();
        let (nx, ny, nz, _) = dwi.dim();
        let mut coeff = Array4::zeros((nx, ny, nz, n_coeff));

        let fitted: Vec<_> = mask_indices(mask).into_par_iter().map(|idx| {
            let [x, y, z] = idx;
            let s0 = b0_mean(dwi, idx, &self.b0s);
            if !(s0 > 0.0) {
                return (idx, vec![0.0; n_coeff]);
            }
            let loglog: Vec<f64> = self.dwi.iter().map(|&q| {
                let e = (dwi[(x, y, z, q)] as f64 / s0 as f64).clamp(MIN_SIGNAL, MAX_SIGNAL);
                (-e.ln()).ln()
            }).collect();
            let mut c: Vec<f64> = (0..n_coeff).map(|row| {
                loglog.iter().enumerate().map(|(col, &v)| self.fit_matrix[(row, col)] * v).sum()
            }).collect();
            // The DC term is fixed so the ODF integrates to one
            c[0] = n0;
            (idx, c)
        }).collect();

        for ([x, y, z], c) in fitted {
            for (r, v) in c.into_iter().enumerate() {
                coeff[(x, y, z, r)] = v as f32;
            }
        }
        Ok(OdfFit { coeff, order: self.order })
    }
}
