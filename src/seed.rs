//! Seed points for tractography: `density` seeds per mask-true voxel, each
//! jittered uniformly inside its voxel. Under the identity transform a voxel
//! centre sits at integer coordinates, so a seed for voxel (i, j, k) lies in
//! the half-open cube [i - 0.5, i + 0.5) x ... and always maps back to its
//! voxel.

use ndarray::Array3;
use rand::Rng;

use crate::types::Point;

pub fn seeds_from_mask<R: Rng>(mask: &Array3<bool>, density: usize, rng: &mut R) -> Vec<Point> {
    let (nx, ny, nz) = mask.dim();
    let mut seeds = Vec::new();
    for (x, y, z) in itertools::iproduct!(0..nx, 0..ny, 0..nz) {
        if !mask[(x, y, z)] { continue; }
        for _ in 0..density {
            seeds.push(Point::new(
                x as f32 + rng.gen_range(-0.5..0.5),
                y as f32 + rng.gen_range(-0.5..0.5),
                z as f32 + rng.gen_range(-0.5..0.5),
            ));
        }
    }
    seeds
}
