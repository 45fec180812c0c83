use crate::{Dir, Sphere};

/// One local maximum of a function sampled on a `Sphere`.
#[derive(Clone, Copy, Debug)]
pub struct Peak {
    pub direction: Dir,
    pub value: f64,
}

/// Reusable peak search over a fixed sphere.
///
/// The neighbourhood lists are precomputed at construction; `find` is called
/// once per voxel in the hot fitting loops, so it must not redo that work.
pub struct PeakFinder<'s> {
    sphere: &'s Sphere,
    neighbors: Vec<Vec<usize>>,
    relative_threshold: f64,
    min_cos: f64,
    max_peaks: usize,
}

/// Neighbourhood radius as a multiple of the mean angular spacing of the
/// covering. Wide enough that every non-maximal sample sees an uphill
/// neighbour, narrower than any separation angle worth asking for.
const NEIGHBOR_SPACING_FACTOR: f64 = 2.0;

impl<'s> PeakFinder<'s> {

    pub fn new(
        sphere: &'s Sphere,
        relative_threshold: f64,
        min_separation_deg: f64,
        max_peaks: usize,
    ) -> Self {
        let mean_spacing = (4.0 * std::f64::consts::PI / sphere.len() as f64).sqrt();
        let radius_cos = (NEIGHBOR_SPACING_FACTOR * mean_spacing).cos();
        let dirs = sphere.dirs();
        let neighbors = dirs.iter().enumerate().map(|(i, d)| {
            dirs.iter().enumerate()
                .filter(|&(j, e)| j != i && d.dot(e).abs() >= radius_cos)
                .map(|(j, _)| j)
                .collect()
        }).collect();
        Self {
            sphere,
            neighbors,
            relative_threshold,
            min_cos: min_separation_deg.to_radians().cos(),
            max_peaks,
        }
    }

    /// Up to `max_peaks` local maxima of `values` (one sample per sphere
    /// direction), antipodal directions treated as equal, in descending value
    /// order. Candidates below `relative_threshold * global_max` are
    /// discarded, as is any candidate within the separation angle of an
    /// already-accepted peak.
    pub fn find(&self, values: &[f64]) -> Vec<Peak> {
        assert_eq!(values.len(), self.sphere.len(), "one sample per direction");

        let global_max = values.iter().cloned().fold(f64::MIN, f64::max);
        if !(global_max > 0.0) { return vec![]; }
        let floor = global_max * self.relative_threshold;

        let mut maxima: Vec<usize> = (0..values.len())
            .filter(|&i| values[i] >= floor)
            .filter(|&i| self.neighbors[i].iter().all(|&j| values[j] <= values[i]))
            .collect();
        maxima.sort_unstable_by(|&a, &b| values[b].total_cmp(&values[a]));

        let mut peaks: Vec<Peak> = Vec::with_capacity(self.max_peaks);
        for i in maxima {
            let d = self.sphere.dir(i);
            if peaks.iter().all(|p| p.direction.dot(&d).abs() < self.min_cos) {
                peaks.push(Peak { direction: d, value: values[i] });
                if peaks.len() == self.max_peaks { break; }
            }
        }
        peaks
    }
}
