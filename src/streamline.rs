use crate::types::Point;

/// One traced fiber path, in voxel coordinates.
pub type Streamline = Vec<Point>;

/// Paths this short are tracing debris, not anatomy.
pub const MIN_POINTS: usize = 60;

/// Keep only streamlines with strictly more than `min_points` points.
pub fn longer_than(min_points: usize, tracks: Vec<Streamline>) -> Vec<Streamline> {
    tracks.into_iter().filter(|t| t.len() > min_points).collect()
}
