//! Per-voxel peak extraction from a fitted orientation model: the discrete
//! form consumed by deterministic tracking.

use ndarray::{Array3, Array4};
use rayon::prelude::*;

use sphere::{PeakFinder, Sphere};

use crate::recon::{mask_indices, OdfFit};
use crate::types::{Index3_u, Vector};

pub const MAX_PEAKS: usize = 5;
pub const RELATIVE_PEAK_THRESHOLD: f64 = 0.5;
pub const MIN_SEPARATION_DEG: f64 = 25.0;

/// Up to `MAX_PEAKS` local ODF maxima per voxel. Peak values are normalized
/// to the voxel's largest peak; absent peaks have value zero.
pub struct PeakField {
    /// (x, y, z, peak * 3): unit directions, zero-padded
    dirs: Array4<f32>,
    /// (x, y, z, peak)
    values: Array4<f32>,
}

impl PeakField {

    pub fn from_fit(fit: &OdfFit, mask: &Array3<bool>, sph: &Sphere) -> Self {
        let [nx, ny, nz] = fit.spatial_dim();
        assert_eq!((nx, ny, nz), mask.dim(), "fit and mask must share spatial shape");

        let basis = sphere::sh_basis(fit.order, sph);
        let finder = PeakFinder::new(sph, RELATIVE_PEAK_THRESHOLD, MIN_SEPARATION_DEG, MAX_PEAKS);

        let mut dirs = Array4::zeros((nx, ny, nz, MAX_PEAKS * 3));
        let mut values = Array4::zeros((nx, ny, nz, MAX_PEAKS));

        let found: Vec<_> = mask_indices(mask).into_par_iter().map(|idx| {
            let odf = fit.odf_at(idx, &basis);
            (idx, finder.find(&odf))
        }).collect();

        for ([x, y, z], peaks) in found {
            let largest = peaks.first().map_or(0.0, |p| p.value);
            if !(largest > 0.0) { continue; }
            for (i, p) in peaks.iter().enumerate() {
                dirs[(x, y, z, 3 * i)]     = p.direction.x as f32;
                dirs[(x, y, z, 3 * i + 1)] = p.direction.y as f32;
                dirs[(x, y, z, 3 * i + 2)] = p.direction.z as f32;
                values[(x, y, z, i)] = (p.value / largest) as f32;
            }
        }
        Self { dirs, values }
    }

    pub fn spatial_dim(&self) -> crate::types::Dim3_u {
        let (x, y, z, _) = self.values.dim();
        [x, y, z]
    }

    /// The voxel's peaks, strongest first.
    pub fn peaks_at(&self, [x, y, z]: Index3_u) -> impl Iterator<Item = (Vector, f32)> + '_ {
        (0..MAX_PEAKS)
            .map(move |i| {
                let d = Vector::new(self.dirs[(x, y, z, 3 * i)],
                                    self.dirs[(x, y, z, 3 * i + 1)],
                                    self.dirs[(x, y, z, 3 * i + 2)]);
                (d, self.values[(x, y, z, i)])
            })
            .take_while(|&(_, v)| v > 0.0)
    }
}

#[cfg(test)]
mod test_peak_field {
    use super::*;
    use crate::recon::{smooth_pinv, SH_ORDER};
    use nalgebra::DVector;
    use ndarray::Array4 as NdArray4;

    /// SH coefficients whose ODF is a set of smooth lobes along `axes`.
    fn lobe_fit(axes: &[(sphere::Dir, f64)]) -> OdfFit {
        let sph = Sphere::with_default_directions();
        let b = sphere::sh_basis(SH_ORDER, &sph);
        let values = DVector::from_iterator(sph.len(), sph.dirs().iter().map(|d| {
            axes.iter().map(|(a, h)| h * d.dot(a).powi(8)).sum::<f64>()
        }));
        let coeffs = smooth_pinv(&b, &vec![0.0; sphere::n_coefficients(SH_ORDER)]) * values;

        let mut coeff = NdArray4::zeros((1, 1, 1, coeffs.len()));
        for (r, &c) in coeffs.iter().enumerate() {
            coeff[(0, 0, 0, r)] = c as f32;
        }
        OdfFit { coeff, order: SH_ORDER }
    }

    #[test]
    fn two_fibers_give_two_normalized_peaks() {
        let x = sphere::Dir::new(1.0, 0.0, 0.0);
        let z = sphere::Dir::new(0.0, 0.0, 1.0);
        let fit = lobe_fit(&[(z, 1.0), (x, 0.8)]);
        let mask = Array3::from_elem((1, 1, 1), true);
        let field = PeakField::from_fit(&fit, &mask, &Sphere::with_default_directions());

        let peaks: Vec<_> = field.peaks_at([0, 0, 0]).collect();
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].1, 1.0); // strongest peak is normalized to one
        assert!(peaks[0].0.z.abs() > 0.95);
        assert!(peaks[1].0.x.abs() > 0.95);
        assert!(peaks[1].1 < 1.0 && peaks[1].1 > 0.5);
    }

    #[test]
    fn unmasked_voxels_have_no_peaks() {
        let fit = lobe_fit(&[(sphere::Dir::new(0.0, 0.0, 1.0), 1.0)]);
        let mask = Array3::from_elem((1, 1, 1), false);
        let field = PeakField::from_fit(&fit, &mask, &Sphere::with_default_directions());
        assert_eq!(field.peaks_at([0, 0, 0]).count(), 0);
    }
}
