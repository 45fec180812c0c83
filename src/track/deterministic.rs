//! Deterministic direction getter: follow the voxel's peak best aligned with
//! the direction of travel.

use crate::peaks::PeakField;
use crate::track::{nearest_voxel, DirectionGetter, MAX_ANGLE_DEG};
use crate::types::{Point, Vector};

pub struct ClosestPeakGetter<'p> {
    peaks: &'p PeakField,
    cos_max_angle: f32,
}

impl<'p> ClosestPeakGetter<'p> {

    pub fn new(peaks: &'p PeakField, max_angle_deg: f32) -> Self {
        Self { peaks, cos_max_angle: max_angle_deg.to_radians().cos() }
    }

    pub fn with_default_angle(peaks: &'p PeakField) -> Self {
        Self::new(peaks, MAX_ANGLE_DEG)
    }
}

impl DirectionGetter for ClosestPeakGetter<'_> {

    fn initial_direction(&mut self, seed: Point) -> Option<Vector> {
        let idx = nearest_voxel(seed, self.peaks.spatial_dim())?;
        self.peaks.peaks_at(idx).next().map(|(d, _)| d)
    }

    fn next_direction(&mut self, point: Point, previous: Vector) -> Option<Vector> {
        let idx = nearest_voxel(point, self.peaks.spatial_dim())?;
        let (best, alignment) = self.peaks.peaks_at(idx)
            .map(|(d, _)| (d, d.dot(&previous)))
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))?;
        if alignment.abs() < self.cos_max_angle { return None; }
        // peaks are sign-ambiguous: keep travelling the same way
        Some(if alignment < 0.0 { -best } else { best })
    }
}
