use crate::Dir;

/// Number of directions in the default sampling scheme. Matches the size of
/// the electrostatic-repulsion scheme that tractography tools conventionally
/// evaluate ODFs on.
pub const DEFAULT_N_DIRECTIONS: usize = 724;

/// A fixed set of unit directions covering the sphere.
#[derive(Clone, Debug)]
pub struct Sphere {
    dirs: Vec<Dir>,
}

impl Sphere {

    /// Deterministic, near-uniform covering of the full sphere by the
    /// golden-section spiral.
    pub fn fibonacci(n: usize) -> Self {
        assert!(n > 1, "a sphere needs more than one direction");
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let dirs = (0..n).map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).sqrt();
            let theta = golden_angle * i as f64;
            Dir::new(r * theta.cos(), r * theta.sin(), z)
        }).collect();
        Self { dirs }
    }

    pub fn with_default_directions() -> Self {
        Self::fibonacci(DEFAULT_N_DIRECTIONS)
    }

    /// Construct directly from unit vectors. Used for gradient schemes, whose
    /// directions come from the scanner rather than from a sampling formula.
    pub fn from_dirs(dirs: Vec<Dir>) -> Self {
        Self { dirs }
    }

    /// The subset of directions with non-negative z. ODFs are antipodally
    /// symmetric, so one hemisphere carries all the information; the
    /// deconvolution constraint grid uses this to halve its size.
    pub fn hemisphere(&self) -> Self {
        Self { dirs: self.dirs.iter().filter(|d| d.z >= 0.0).cloned().collect() }
    }

    pub fn len(&self) -> usize { self.dirs.len() }

    pub fn is_empty(&self) -> bool { self.dirs.is_empty() }

    pub fn dirs(&self) -> &[Dir] { &self.dirs }

    pub fn dir(&self, i: usize) -> Dir { self.dirs[i] }
}
