//! Local tractography: step-wise path tracing through a fitted orientation
//! field, from every seed, until the stopping criterion fires.

pub mod deterministic;
pub mod local;
pub mod probabilistic;

pub use deterministic::ClosestPeakGetter;
pub use local::{track, TrackingParams};
pub use probabilistic::{pmf_from_fit, PmfField, ProbabilisticGetter};

use ndarray::Array3;

use crate::types::{Dim3_u, Index3_u, Point, Vector};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMethod {
    /// Follow the best-aligned ODF peak at each step
    Det,
    /// Sample each step's direction from the ODF probability mass
    Prob,
}

/// Tracing step length, in voxel units under the identity transform.
pub const STEP_SIZE: f32 = 0.5;

/// Maximum turn between successive steps.
pub const MAX_ANGLE_DEG: f32 = 60.0;

/// Bound on steps per half-track, so tracing always terminates.
pub const MAX_STEPS: usize = 500;

/// The voxel whose centre is nearest to `p`, or `None` outside the volume.
pub fn nearest_voxel(p: Point, [nx, ny, nz]: Dim3_u) -> Option<Index3_u> {
    let x = (p.x + 0.5).floor();
    let y = (p.y + 0.5).floor();
    let z = (p.z + 0.5).floor();
    if x < 0.0 || y < 0.0 || z < 0.0 { return None; }
    let (x, y, z) = (x as usize, y as usize, z as usize);
    if x >= nx || y >= ny || z >= nz { return None; }
    Some([x, y, z])
}

/// Supplies tracing directions. Implementations hold whatever per-voxel
/// representation they need (peaks, probability mass) and, for stochastic
/// getters, their own RNG.
pub trait DirectionGetter {
    /// Direction to launch a path from a seed, or `None` if the model has
    /// nothing to offer there.
    fn initial_direction(&mut self, seed: Point) -> Option<Vector>;

    /// Direction for the next step, given where the path is and the direction
    /// that brought it here. `None` ends the path.
    fn next_direction(&mut self, point: Point, previous: Vector) -> Option<Vector>;
}

/// Binary stopping: a path halts the instant a step leaves the mask. Points
/// outside the volume count as outside the mask.
pub struct BinaryStoppingCriterion<'m> {
    mask: &'m Array3<bool>,
}

impl<'m> BinaryStoppingCriterion<'m> {

    pub fn new(mask: &'m Array3<bool>) -> Self {
        Self { mask }
    }

    pub fn dim(&self) -> Dim3_u {
        let (x, y, z) = self.mask.dim();
        [x, y, z]
    }

    pub fn within(&self, p: Point) -> bool {
        match nearest_voxel(p, self.dim()) {
            Some([x, y, z]) => self.mask[(x, y, z)],
            None => false,
        }
    }
}
