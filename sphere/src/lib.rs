mod dirs;
mod harmonics;
mod peaks;

pub use dirs::{Sphere, DEFAULT_N_DIRECTIONS};
pub use harmonics::{n_coefficients, degrees, sh_basis, sh_basis_dirs, axial_basis, legendre_p0};
pub use peaks::{Peak, PeakFinder};

pub use nalgebra::Vector3;
pub type Dir = Vector3<f64>;
