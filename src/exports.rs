pub use crate::types::{Coordf32, Point, Vector, Index3_u, Dim3_u};

pub use crate::gradients::GradientTable;
pub use crate::mask::wm_mask;
pub use crate::recon::{ReconMethod, OdfFit};
pub use crate::track::TrackingMethod;
pub use crate::streamline::Streamline;
