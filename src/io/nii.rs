//! NIfTI volume input. Volumes are consumed as plain numeric arrays in
//! native (x, y, z[, q]) axis order; the affine is not reinterpreted because
//! the whole pipeline runs in voxel space under an identity transform.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, ArrayD, Axis, Ix3, Ix4};
use nifti::error::NiftiError;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

#[derive(Debug)]
pub enum LoadError {
    Nifti(PathBuf, NiftiError),
    Dim { path: PathBuf, expected: usize, got: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Nifti(path, e) => write!(f, "{}: {e}", path.display()),
            LoadError::Dim { path, expected, got } =>
                write!(f, "{}: expected a {expected}D volume, got {got}D", path.display()),
        }
    }
}

impl std::error::Error for LoadError {}

/// 3D scalar volume (e.g. a parcellation).
pub fn load_3d(path: &Path) -> Result<Array3<f32>, LoadError> {
    let data = load(path)?;
    let data = drop_trailing_singletons(data, 3);
    let got = data.ndim();
    data.into_dimensionality::<Ix3>()
        .map_err(|_| LoadError::Dim { path: path.to_owned(), expected: 3, got })
}

/// 4D volume: three spatial axes plus one measurement axis.
pub fn load_4d(path: &Path) -> Result<Array4<f32>, LoadError> {
    let data = load(path)?;
    let got = data.ndim();
    data.into_dimensionality::<Ix4>()
        .map_err(|_| LoadError::Dim { path: path.to_owned(), expected: 4, got })
}

fn load(path: &Path) -> Result<ArrayD<f32>, LoadError> {
    let wrap = |e| LoadError::Nifti(path.to_owned(), e);
    let obj = ReaderOptions::new().read_file(path).map_err(wrap)?;
    obj.into_volume().into_ndarray::<f32>().map_err(wrap)
}

// Some writers pad 3D images out to dim[0] = 4 with a final axis of length 1
fn drop_trailing_singletons(mut data: ArrayD<f32>, down_to: usize) -> ArrayD<f32> {
    while data.ndim() > down_to && data.len_of(Axis(data.ndim() - 1)) == 1 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    data
}

#[cfg(test)]
mod test_nii {
    use super::*;
    use pretty_assertions::assert_eq;
    use float_eq::assert_float_eq;
    use std::io::Write;

    // Hand-rolled single-file NIfTI-1: 348-byte header, 4 bytes padding,
    // float32 little-endian data. Just enough for the reader.
    fn write_nifti(path: &Path, dims: &[usize], data: &[f32]) {
        let mut hdr = vec![0u8; 352];
        hdr[0..4].copy_from_slice(&348i32.to_le_bytes());
        let ndim = dims.len() as i16;
        hdr[40..42].copy_from_slice(&ndim.to_le_bytes());
        for (i, &d) in dims.iter().enumerate() {
            hdr[42 + 2 * i..44 + 2 * i].copy_from_slice(&(d as i16).to_le_bytes());
        }
        for i in dims.len()..7 {
            hdr[42 + 2 * i..44 + 2 * i].copy_from_slice(&1i16.to_le_bytes());
        }
        hdr[70..72].copy_from_slice(&16i16.to_le_bytes()); // NIFTI_TYPE_FLOAT32
        hdr[72..74].copy_from_slice(&32i16.to_le_bytes()); // bitpix
        // pixdim[0..3] = 1.0
        for i in 0..4 {
            hdr[76 + 4 * i..80 + 4 * i].copy_from_slice(&1.0f32.to_le_bytes());
        }
        hdr[108..112].copy_from_slice(&352.0f32.to_le_bytes()); // vox_offset
        hdr[112..116].copy_from_slice(&1.0f32.to_le_bytes());   // scl_slope
        hdr[344..348].copy_from_slice(b"n+1\0");
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&hdr).unwrap();
        for x in data {
            file.write_all(&x.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn load_3d_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii");
        let data: Vec<f32> = (0..24).map(|i| i as f32).collect();
        write_nifti(&path, &[2, 3, 4], &data);
        let vol = load_3d(&path).unwrap();
        assert_eq!(vol.dim(), (2, 3, 4));
        // NIfTI stores x fastest
        assert_float_eq!(vol[(1, 0, 0)], 1.0, abs <= 0.0);
        assert_float_eq!(vol[(0, 1, 0)], 2.0, abs <= 0.0);
        assert_float_eq!(vol[(0, 0, 1)], 6.0, abs <= 0.0);
    }

    #[test]
    fn load_4d_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwi.nii");
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        write_nifti(&path, &[2, 2, 2, 2], &data);
        let vol = load_4d(&path).unwrap();
        assert_eq!(vol.dim(), (2, 2, 2, 2));
        assert_float_eq!(vol[(0, 0, 0, 1)], 8.0, abs <= 0.0);
    }

    #[test]
    fn padded_3d_is_squeezed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii");
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        write_nifti(&path, &[2, 2, 2, 1], &data);
        let vol = load_3d(&path).unwrap();
        assert_eq!(vol.dim(), (2, 2, 2));
    }

    #[test]
    fn wrong_rank_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii");
        write_nifti(&path, &[2, 2, 2], &(0..8).map(|i| i as f32).collect::<Vec<_>>());
        assert!(matches!(load_4d(&path), Err(LoadError::Dim { got: 3, .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(load_3d(Path::new("/no/such/file.nii")),
                         Err(LoadError::Nifti(..))));
    }
}
