//! Diffusion gradient table: one (b-value, direction) pair per volume along
//! the 4th axis of the DWI image. Read from FSL-style `bvals` / `bvecs` text
//! files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};

/// b-values at or below this are treated as unweighted (b0) measurements.
pub const B0_THRESHOLD: f32 = 50.0;

#[derive(Clone, Debug)]
pub struct GradientTable {
    bvals: Array1<f32>,
    /// One row per measurement, unit length except for b0 rows.
    bvecs: Array2<f32>,
}

#[derive(Debug)]
pub enum GradientError {
    Io(PathBuf, std::io::Error),
    Parse { path: PathBuf, token: String },
    /// bvecs table is neither 3xN nor Nx3
    Shape { rows: usize, cols: usize },
    LengthMismatch { bvals: usize, bvecs: usize },
    /// a diffusion-weighted row has (near-)zero direction
    ZeroDirection { index: usize },
    /// every measurement is b0: nothing to fit a model to
    NoDiffusionWeighting,
}

impl fmt::Display for GradientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use GradientError::*;
        match self {
            Io(path, e)         => write!(f, "cannot read {}: {e}", path.display()),
            Parse { path, token } => write!(f, "{}: not a number: {token:?}", path.display()),
            Shape { rows, cols }  => write!(f, "bvecs must be 3xN or Nx3, got {rows}x{cols}"),
            LengthMismatch { bvals, bvecs } =>
                write!(f, "{bvals} b-values but {bvecs} b-vectors"),
            ZeroDirection { index } =>
                write!(f, "measurement {index} is diffusion-weighted but has zero direction"),
            NoDiffusionWeighting => write!(f, "gradient table contains only b0 measurements"),
        }
    }
}

impl std::error::Error for GradientError {}

impl GradientTable {

    /// Pair up b-values and directions. Directions of diffusion-weighted
    /// rows are normalized; b0 rows may be zero.
    pub fn new(bvals: Array1<f32>, mut bvecs: Array2<f32>) -> Result<Self, GradientError> {
        if bvals.len() != bvecs.nrows() {
            return Err(GradientError::LengthMismatch { bvals: bvals.len(), bvecs: bvecs.nrows() });
        }
        for (i, (&b, mut row)) in bvals.iter().zip(bvecs.rows_mut()).enumerate() {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if b > B0_THRESHOLD {
                if norm < 1e-6 { return Err(GradientError::ZeroDirection { index: i }); }
                row.mapv_inplace(|x| x / norm);
            }
        }
        if bvals.iter().all(|&b| b <= B0_THRESHOLD) {
            return Err(GradientError::NoDiffusionWeighting);
        }
        Ok(Self { bvals, bvecs })
    }

    pub fn from_files(bvals: &Path, bvecs: &Path) -> Result<Self, GradientError> {
        let bval_rows = read_float_table(bvals)?;
        let bvec_rows = read_float_table(bvecs)?;
        let bvals = Array1::from(bval_rows.into_iter().flatten().collect::<Vec<f32>>());
        Ok(Self::new(bvals, vectors_from_rows(bvec_rows)?)?)
    }

    pub fn len(&self) -> usize { self.bvals.len() }

    pub fn is_empty(&self) -> bool { self.bvals.is_empty() }

    pub fn bvals(&self) -> &Array1<f32> { &self.bvals }

    pub fn bvecs(&self) -> &Array2<f32> { &self.bvecs }

    pub fn is_b0(&self, i: usize) -> bool { self.bvals[i] <= B0_THRESHOLD }

    pub fn b0_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.is_b0(i)).collect()
    }

    pub fn dwi_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.is_b0(i)).collect()
    }

    /// Directions of the diffusion-weighted measurements, in fitting precision.
    pub fn dwi_dirs(&self) -> Vec<sphere::Dir> {
        self.dwi_indices().into_iter()
            .map(|i| {
                let row = self.bvecs.row(i);
                sphere::Dir::new(row[0] as f64, row[1] as f64, row[2] as f64)
            })
            .collect()
    }

    /// b-values of the diffusion-weighted measurements.
    pub fn dwi_bvals(&self) -> Vec<f32> {
        self.dwi_indices().into_iter().map(|i| self.bvals[i]).collect()
    }
}

/// Whitespace-separated numbers, one row per non-empty line.
fn read_float_table(path: &Path) -> Result<Vec<Vec<f32>>, GradientError> {
    let text = fs::read_to_string(path)
        .map_err(|e| GradientError::Io(path.to_owned(), e))?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            line.split_whitespace()
                .map(|tok| tok.parse::<f32>()
                     .map_err(|_| GradientError::Parse { path: path.to_owned(), token: tok.into() }))
                .collect()
        })
        .collect()
}

/// Accept the FSL layout (3 rows of N) as well as its transpose (N rows of 3).
fn vectors_from_rows(rows: Vec<Vec<f32>>) -> Result<Array2<f32>, GradientError> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(GradientError::Shape { rows: nrows, cols: 0 });
    }
    if nrows == 3 && ncols != 3 {
        let mut out = Array2::zeros((ncols, 3));
        for (i, row) in rows.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                out[(j, i)] = x;
            }
        }
        Ok(out)
    } else if ncols == 3 {
        let mut out = Array2::zeros((nrows, 3));
        for (i, row) in rows.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                out[(i, j)] = x;
            }
        }
        Ok(out)
    } else {
        Err(GradientError::Shape { rows: nrows, cols: ncols })
    }
}
