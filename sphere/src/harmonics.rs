//! Real symmetric spherical-harmonic basis, for even degrees only (diffusion
//! signals and ODFs are antipodally symmetric, so odd degrees vanish).

use nalgebra::DMatrix;

use crate::{Dir, Sphere};

/// Number of basis functions for even degrees `0, 2, .., order`.
pub const fn n_coefficients(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// Degree `l` of each basis function, in basis order.
pub fn degrees(order: usize) -> Vec<usize> {
    let mut ls = Vec::with_capacity(n_coefficients(order));
    for l in (0..=order).step_by(2) {
        for _m in 0..(2 * l + 1) {
            ls.push(l);
        }
    }
    ls
}

/// Legendre polynomial `P_l(0)`, the Funk-Radon eigenvalue factor. Zero for
/// odd `l`; for even `l` it is `(-1)^(l/2) (l-1)!! / l!!`.
pub fn legendre_p0(l: usize) -> f64 {
    if l % 2 == 1 { return 0.0; }
    let mut p = 1.0;
    let mut k = 2;
    while k <= l {
        p *= -((k - 1) as f64) / k as f64;
        k += 2;
    }
    p
}

/// Basis matrix over the directions of `sphere`: one row per direction, one
/// column per basis function.
pub fn sh_basis(order: usize, sphere: &Sphere) -> DMatrix<f64> {
    sh_basis_dirs(order, sphere.dirs())
}

pub fn sh_basis_dirs(order: usize, dirs: &[Dir]) -> DMatrix<f64> {
    let cols = n_coefficients(order);
    let mut b = DMatrix::zeros(dirs.len(), cols);
    for (row, d) in dirs.iter().enumerate() {
        let (theta, phi) = to_angles(d);
        let mut col = 0;
        for l in (0..=order).step_by(2) {
            for m in -(l as i64)..=(l as i64) {
                b[(row, col)] = real_sh(l, m, theta, phi);
                col += 1;
            }
        }
    }
    b
}

/// Axially symmetric basis: the `m = 0` columns only. Response functions are
/// rotationally symmetric about their fiber axis, so this is all they need.
pub fn axial_basis(order: usize, dirs: &[Dir]) -> DMatrix<f64> {
    let cols = order / 2 + 1;
    let mut b = DMatrix::zeros(dirs.len(), cols);
    for (row, d) in dirs.iter().enumerate() {
        let (theta, _phi) = to_angles(d);
        for (col, l) in (0..=order).step_by(2).enumerate() {
            b[(row, col)] = real_sh(l, 0, theta, 0.0);
        }
    }
    b
}

fn to_angles(d: &Dir) -> (f64, f64) {
    let theta = d.z.clamp(-1.0, 1.0).acos();
    let phi = d.y.atan2(d.x);
    (theta, phi)
}

/// Real spherical harmonic `Y_l^m(theta, phi)`:
/// `m < 0` pairs with `sin(|m| phi)`, `m > 0` with `cos(m phi)`.
fn real_sh(l: usize, m: i64, theta: f64, phi: f64) -> f64 {
    let ma = m.unsigned_abs() as usize;
    let k = normalization(l, ma) * assoc_legendre(l, ma, theta.cos());
    match m.signum() {
        0  => k,
        1  => std::f64::consts::SQRT_2 * k * (ma as f64 * phi).cos(),
        _  => std::f64::consts::SQRT_2 * k * (ma as f64 * phi).sin(),
    }
}

/// `sqrt((2l+1)/(4 pi) * (l-m)!/(l+m)!)`
fn normalization(l: usize, m: usize) -> f64 {
    let mut ratio = 1.0;
    for k in (l - m + 1)..=(l + m) {
        ratio /= k as f64;
    }
    ((2 * l + 1) as f64 / (4.0 * std::f64::consts::PI) * ratio).sqrt()
}

/// Associated Legendre `P_l^m(x)` by the standard upward recurrences,
/// including the Condon-Shortley phase.
fn assoc_legendre(l: usize, m: usize, x: f64) -> f64 {
    debug_assert!(m <= l);
    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    if l == m { return pmm; }
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 { return pmmp1; }
    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = ((2 * ll - 1) as f64 * x * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}
