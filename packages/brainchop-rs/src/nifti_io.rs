//! NIfTI-1 file reading and segmentation export.

use crate::error::{BrainchopError, Result};
use crate::profile_scope;
use crate::volume::{DataType, Volume, VolumeHeader};
use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;
use ndarray::{Array3, ShapeBuilder};
use nifti::writer::WriterOptions;
use nifti::{Endianness, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// Export name for a segmentation produced on `date`
pub fn segmentation_filename(date: NaiveDate) -> String {
    format!("brainchop_segmentation_{}.nii.gz", date.format("%Y-%m-%d"))
}

pub fn segmentation_filename_today() -> String {
    segmentation_filename(chrono::Local::now().date_naive())
}

fn nifti_err(path: &Path, e: impl std::fmt::Display) -> BrainchopError {
    BrainchopError::Nifti(format!("{}: {}", path.display(), e))
}

/// Voxel-to-world rows: sform when set, else qform, else plain voxel spacing.
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    if header.sform_code > 0 {
        let row = |r: [f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
        return [row(header.srow_x), row(header.srow_y), row(header.srow_z)];
    }

    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let mut dz = header.pixdim[3] as f64;

    if header.qform_code > 0 {
        let (b, c, d) = (
            header.quatern_b as f64,
            header.quatern_c as f64,
            header.quatern_d as f64,
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        // qfac is stored in pixdim[0]
        if header.pixdim[0] < 0.0 {
            dz = -dz;
        }
        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let offset = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];
        let mut rows = [[0.0; 4]; 3];
        for (w, row) in rows.iter_mut().enumerate() {
            *row = [r[w][0] * dx, r[w][1] * dy, r[w][2] * dz, offset[w]];
        }
        return rows;
    }

    [
        [dx, 0.0, 0.0, 0.0],
        [0.0, dy, 0.0, 0.0],
        [0.0, 0.0, dz, 0.0],
    ]
}

/// Read a `.nii` or `.nii.gz` file. Only the first 3-D volume of a series is kept.
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    profile_scope!("nifti_io::read_volume");
    let path = path.as_ref();

    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| nifti_err(path, e))?;
    let header = obj.header().clone();
    let datatype = DataType::from_code(header.datatype)?;

    let ndim = header.dim[0] as usize;
    if ndim == 0 || ndim > 7 {
        return Err(nifti_err(path, format!("invalid dimension count {}", ndim)));
    }
    let dim = |axis: usize| {
        if axis <= ndim {
            (header.dim[axis] as usize).max(1)
        } else {
            1
        }
    };
    let dims = [dim(1), dim(2), dim(3)];
    if ndim > 3 && dim(4) > 1 {
        log::warn!(
            "{} holds {} volumes, using the first",
            path.display(),
            dim(4)
        );
    }

    let mut raw = obj.into_volume().into_raw_data();
    let bpv = datatype.bytes_per_voxel();
    let byte_len = dims.iter().product::<usize>() * bpv;
    if raw.len() < byte_len {
        return Err(nifti_err(
            path,
            format!("expected {} bytes of voxel data, found {}", byte_len, raw.len()),
        ));
    }
    raw.truncate(byte_len);
    if header.endianness == Endianness::Big && bpv > 1 {
        for voxel in raw.chunks_exact_mut(bpv) {
            voxel.reverse();
        }
    }

    let vol_header = VolumeHeader {
        dims,
        datatype,
        pixdim: [header.pixdim[1], header.pixdim[2], header.pixdim[3]],
        affine: header_affine(&header),
        scl_slope: header.scl_slope,
        scl_inter: header.scl_inter,
        intent_code: header.intent_code,
    };

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("volume.nii")
        .to_string();

    log::info!(
        "NIfTI file loaded: {:?}, dims: {:?}, {}",
        path,
        dims,
        datatype
    );
    Volume::new(name, vol_header, raw)
}

/// Scaling other than identity (a zero slope counts as unscaled)
fn has_scaling(header: &VolumeHeader) -> bool {
    (header.scl_slope != 0.0 && header.scl_slope != 1.0) || header.scl_inter != 0.0
}

fn output_header(volume: &Volume) -> NiftiHeader {
    let h = volume.header();
    if has_scaling(h) {
        // scaled values are written out as float32 with a unit slope
        return NiftiHeader {
            datatype: DataType::Float32.code(),
            bitpix: 32,
            scl_slope: 1.0,
            scl_inter: 0.0,
            ..header_for(h)
        };
    }
    header_for(h)
}

fn header_for(h: &VolumeHeader) -> NiftiHeader {
    let row = |r: [f64; 4]| [r[0] as f32, r[1] as f32, r[2] as f32, r[3] as f32];
    NiftiHeader {
        dim: [3, h.dims[0] as u16, h.dims[1] as u16, h.dims[2] as u16, 1, 1, 1, 1],
        datatype: h.datatype.code(),
        bitpix: (h.datatype.bytes_per_voxel() * 8) as i16,
        pixdim: [1.0, h.pixdim[0], h.pixdim[1], h.pixdim[2], 0.0, 0.0, 0.0, 0.0],
        scl_slope: h.scl_slope,
        scl_inter: h.scl_inter,
        intent_code: h.intent_code,
        sform_code: 2,
        qform_code: 0,
        srow_x: row(h.affine[0]),
        srow_y: row(h.affine[1]),
        srow_z: row(h.affine[2]),
        ..NiftiHeader::default()
    }
}

/// Write `volume` as NIfTI-1; a `.gz` extension selects gzip compression.
pub fn write_volume<P: AsRef<Path>>(volume: &Volume, path: P) -> Result<()> {
    profile_scope!("nifti_io::write_volume");
    let path = path.as_ref();
    let header = output_header(volume);
    let [x, y, z] = volume.dims();
    let shape = (x, y, z).f();
    let img = volume.img();
    let n = x * y * z;

    let writer = WriterOptions::new(path).reference_header(&header);

    macro_rules! write_as {
        ($values:expr) => {{
            let array = Array3::from_shape_vec(shape, $values)
                .map_err(|e| nifti_err(path, e))?;
            writer.write_nifti(&array).map_err(|e| nifti_err(path, e))?
        }};
    }

    macro_rules! decode {
        ($ty:ty, $read:path) => {{
            let mut values = vec![<$ty>::default(); n];
            $read(img, &mut values);
            values
        }};
    }

    if has_scaling(volume.header()) {
        log::debug!(
            "{} has slope {} and intercept {}, writing scaled float32 values",
            volume.name,
            volume.header().scl_slope,
            volume.header().scl_inter
        );
        let values: Vec<f32> = (0..n).map(|i| volume.voxel_value(i) as f32).collect();
        write_as!(values);
        log::info!("Wrote {} to {}", volume.name, path.display());
        return Ok(());
    }

    match volume.header().datatype {
        DataType::Uint8 => write_as!(img.to_vec()),
        DataType::Int8 => write_as!(img.iter().map(|&b| b as i8).collect::<Vec<i8>>()),
        DataType::Int16 => write_as!(decode!(i16, LittleEndian::read_i16_into)),
        DataType::Uint16 => write_as!(decode!(u16, LittleEndian::read_u16_into)),
        DataType::Int32 => write_as!(decode!(i32, LittleEndian::read_i32_into)),
        DataType::Uint32 => write_as!(decode!(u32, LittleEndian::read_u32_into)),
        DataType::Float32 => write_as!(decode!(f32, LittleEndian::read_f32_into)),
        DataType::Float64 => write_as!(decode!(f64, LittleEndian::read_f64_into)),
    }

    log::info!("Wrote {} to {}", volume.name, path.display());
    Ok(())
}
