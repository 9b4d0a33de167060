//! NIfTI volume I/O
//!
//! Loads `.nii` / `.nii.gz` files into [`Volume`]s and writes volumes and
//! masks back as single-file NIfTI-1 (float32). Gzip is detected from the
//! magic bytes on read and from the `.nii.gz` suffix on write.

use std::io::{Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::volume::{Grid, Mask, Volume};

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("File too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Load a NIfTI volume from bytes
///
/// Supports both .nii and .nii.gz content. Volumes with more than three
/// dimensions are reduced to their first frame.
pub fn load_nifti(bytes: &[u8]) -> Result<Volume> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = if std::io::Read::read_to_end(&mut GzDecoder::new(Cursor::new(bytes)), &mut decompressed).is_ok() {
                get_header_info(&decompressed)
            } else {
                "could not decompress".to_string()
            };
            Error::Nifti(format!("failed to read gzipped NIfTI: {} ({})", e, info))
        })?
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| Error::Nifti(format!("failed to read NIfTI: {} ({})", e, info)))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(Error::Nifti(format!("expected at least a 3D volume, got {}D", ndim)));
    }

    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| Error::Nifti(format!("failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(Error::Nifti(format!("expected at least a 3D array, got {}D", shape.len())));
    }
    if shape.len() > 3 && shape[3..].iter().product::<usize>() > 1 {
        warn!(shape = ?shape, "volume has more than three dimensions; using the first frame");
    }

    // nifti-rs may reorder, so dimensions come from the array itself
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let mut data = Vec::with_capacity(nx * ny * nz);
    let mut index = vec![0usize; shape.len()];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                index[0] = i;
                index[1] = j;
                index[2] = k;
                data.push(array[index.as_slice()]);
            }
        }
    }

    debug!(dims = ?(nx, ny, nz), ?voxel_size, "loaded NIfTI volume");
    Volume::new(Grid::new((nx, ny, nz), voxel_size, affine), data)
}

/// Get affine transformation matrix from header
///
/// sform wins when present, then the quaternion qform, then plain voxel scaling.
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else if header.qform_code > 0 {
        qform_affine(header)
    } else {
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

fn qform_affine(header: &NiftiHeader) -> [f64; 16] {
    let b = header.quatern_b as f64;
    let c = header.quatern_c as f64;
    let d = header.quatern_d as f64;
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();

    let r = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
    ];
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let scale = [
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64 * qfac,
    ];
    let offset = [header.quatern_x as f64, header.quatern_y as f64, header.quatern_z as f64];

    let mut affine = [0.0; 16];
    for row in 0..3 {
        for col in 0..3 {
            affine[row * 4 + col] = r[row][col] * scale[col];
        }
        affine[row * 4 + 3] = offset[row];
    }
    affine[15] = 1.0;
    affine
}

/// Serialise a volume as uncompressed single-file NIfTI-1 (float32)
pub fn save_nifti(volume: &Volume) -> Result<Vec<u8>> {
    let (nx, ny, nz) = volume.grid.dims;
    let (vsx, vsy, vsz) = volume.grid.voxel_size;
    let affine = &volume.grid.affine;

    for (axis, &n) in [nx, ny, nz].iter().enumerate() {
        if n > i16::MAX as usize {
            return Err(Error::Nifti(format!("dimension {} ({}) exceeds NIfTI-1 limit", axis, n)));
        }
    }

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // xyzt_units = mm
    header[123] = 2;

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + col] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + volume.data.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in &volume.data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }

    Ok(buffer)
}

/// Serialise a volume as gzipped NIfTI-1 (.nii.gz)
pub fn save_nifti_gz(volume: &Volume) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let uncompressed = save_nifti(volume)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| Error::Nifti(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Nifti(format!("gzip finish failed: {}", e)))
}

/// Read a NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<Volume> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    load_nifti(&bytes).map_err(|e| match e {
        Error::Nifti(msg) => Error::Nifti(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Read a mask file; any voxel above 0.5 is inside
pub fn read_mask_file(path: &Path) -> Result<Mask> {
    let volume = read_nifti_file(path)?;
    Ok(Mask::from_volume(&volume, 0.5))
}

/// Save a volume to a file, gzip compressed when the path ends with .nii.gz
pub fn save_nifti_to_file(path: &Path, volume: &Volume) -> Result<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        save_nifti_gz(volume)?
    } else {
        save_nifti(volume)?
    };
    std::fs::write(path, &bytes).map_err(|e| Error::io(path, e))
}

pub fn save_mask_to_file(path: &Path, mask: &Mask) -> Result<()> {
    save_nifti_to_file(path, &mask.to_volume())
}
