//! TrackVis `.trk` tractogram output: a fixed 1000-byte header followed by
//! one `(n_points, n_points * xyz)` run per streamline.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use binrw::{binrw, BinResult, BinReaderExt, BinWriterExt};

use crate::streamline::Streamline;
use crate::types::Point;

#[binrw]
#[brw(little, magic = b"TRACK\0")]
#[derive(Clone, Debug)]
pub struct TrkHeader {
    pub dim: [i16; 3],
    pub voxel_size: [f32; 3],
    pub origin: [f32; 3],
    pub n_scalars: i16,
    pub scalar_names: [u8; 200],
    pub n_properties: i16,
    pub property_names: [u8; 200],
    pub vox_to_ras: [[f32; 4]; 4],
    pub reserved: [u8; 444],
    pub voxel_order: [u8; 4],
    pub pad2: [u8; 4],
    pub image_orientation_patient: [f32; 6],
    pub pad1: [u8; 2],
    pub invert_flags: [u8; 6],
    pub n_count: i32,
    pub version: i32,
    pub hdr_size: i32,
}

impl TrkHeader {
    pub fn new(dim: [usize; 3], voxel_size: [f32; 3], n_count: usize) -> Self {
        let [vx, vy, vz] = voxel_size;
        Self {
            dim: dim.map(|d| d as i16),
            voxel_size,
            origin: [0.0; 3],
            n_scalars: 0,
            scalar_names: [0; 200],
            n_properties: 0,
            property_names: [0; 200],
            vox_to_ras: [[vx, 0.0, 0.0, 0.0],
                         [0.0, vy, 0.0, 0.0],
                         [0.0, 0.0, vz, 0.0],
                         [0.0, 0.0, 0.0, 1.0]],
            reserved: [0; 444],
            voxel_order: *b"RAS\0",
            pad2: [0; 4],
            image_orientation_patient: [0.0; 6],
            pad1: [0; 2],
            invert_flags: [0; 6],
            n_count: n_count as i32,
            version: 2,
            hdr_size: 1000,
        }
    }
}

/// Write a tractogram. Streamline points are voxel coordinates; TrackVis
/// wants mm, with the centre of voxel (i,j,k) at ((i+0.5)vx, (j+0.5)vy,
/// (k+0.5)vz).
pub fn write(
    path: &Path,
    streamlines: &[Streamline],
    dim: [usize; 3],
    voxel_size: [f32; 3],
) -> BinResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_le(&TrkHeader::new(dim, voxel_size, streamlines.len()))?;
    let [vx, vy, vz] = voxel_size;
    for track in streamlines {
        out.write_le(&(track.len() as i32))?;
        for p in track {
            out.write_le(&[(p.x + 0.5) * vx, (p.y + 0.5) * vy, (p.z + 0.5) * vz])?;
        }
    }
    Ok(())
}

/// Read a tractogram back into voxel coordinates. Only needed by tests and
/// sanity checks; scalar/property payloads are not supported.
pub fn read(path: &Path) -> BinResult<(TrkHeader, Vec<Streamline>)> {
    let mut input = BufReader::new(File::open(path)?);
    let header: TrkHeader = input.read_le()?;
    let [vx, vy, vz] = header.voxel_size;
    let mut tracks = Vec::with_capacity(header.n_count.max(0) as usize);
    for _ in 0..header.n_count {
        let n: i32 = input.read_le()?;
        let mut track = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n {
            let [x, y, z]: [f32; 3] = input.read_le()?;
            track.push(Point::new(x / vx - 0.5, y / vy - 0.5, z / vz - 0.5));
        }
        tracks.push(track);
    }
    Ok((header, tracks))
}

#[cfg(test)]
mod test_trk {
    use super::*;
    use float_eq::assert_float_eq;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn trk_roundtrip() -> BinResult<()> {
        use tempfile::tempdir;

        // Harmless temporary location for output file
        let dir = tempdir()?;
        let file_path = dir.path().join("test.trk");

        let tracks = vec![
            vec![Point::new(0.0, 0.0, 0.0), Point::new(0.5, 1.0, 1.5)],
            vec![Point::new(3.0, 2.0, 1.0); 5],
        ];
        write(&file_path, &tracks, [10, 12, 14], [1.25, 1.25, 1.25])?;

        let (header, reloaded) = read(&file_path)?;
        assert_eq!(header.hdr_size, 1000);
        assert_eq!(header.version, 2);
        assert_eq!(header.dim, [10, 12, 14]);
        assert_eq!(header.n_count, 2);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[1].len(), 5);
        for (a, b) in tracks[0].iter().zip(&reloaded[0]) {
            assert_float_eq!(a.x, b.x, abs <= 1e-5);
            assert_float_eq!(a.y, b.y, abs <= 1e-5);
            assert_float_eq!(a.z, b.z, abs <= 1e-5);
        }
        Ok(())
    }

    #[test]
    fn header_is_1000_bytes() -> BinResult<()> {
        let mut buf = binrw::io::Cursor::new(vec![]);
        buf.write_le(&TrkHeader::new([1, 1, 1], [1.0; 3], 0))?;
        assert_eq!(buf.into_inner().len(), 1000);
        Ok(())
    }
}
