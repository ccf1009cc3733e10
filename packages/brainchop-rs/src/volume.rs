use crate::error::{BrainchopError, Result};
use crate::palette::LabelColormap;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Edge length of a conformed volume along every axis.
pub const CONFORMED_DIM: usize = 256;

/// Axis permutation of a conformed (LIA) volume.
pub const CONFORMED_PERM_RAS: [i8; 3] = [-1, 3, -2];

/// NIFTI_INTENT_LABEL: voxel values are indices into a label table.
pub const INTENT_LABEL: i16 = 1002;

/// Voxel storage type, identified on disk by its NIfTI datatype code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Uint8,
    Int8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl DataType {
    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            2 => Ok(DataType::Uint8),
            4 => Ok(DataType::Int16),
            8 => Ok(DataType::Int32),
            16 => Ok(DataType::Float32),
            64 => Ok(DataType::Float64),
            256 => Ok(DataType::Int8),
            512 => Ok(DataType::Uint16),
            768 => Ok(DataType::Uint32),
            other => Err(BrainchopError::UnsupportedDatatype(other)),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            DataType::Uint8 => 2,
            DataType::Int16 => 4,
            DataType::Int32 => 8,
            DataType::Float32 => 16,
            DataType::Float64 => 64,
            DataType::Int8 => 256,
            DataType::Uint16 => 512,
            DataType::Uint32 => 768,
        }
    }

    pub fn bytes_per_voxel(self) -> usize {
        match self {
            DataType::Uint8 | DataType::Int8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Decode one little-endian voxel from `bytes` (exactly `bytes_per_voxel` long).
    fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            DataType::Uint8 => bytes[0] as f64,
            DataType::Int8 => bytes[0] as i8 as f64,
            DataType::Int16 => LittleEndian::read_i16(bytes) as f64,
            DataType::Uint16 => LittleEndian::read_u16(bytes) as f64,
            DataType::Int32 => LittleEndian::read_i32(bytes) as f64,
            DataType::Uint32 => LittleEndian::read_u32(bytes) as f64,
            DataType::Float32 => LittleEndian::read_f32(bytes) as f64,
            DataType::Float64 => LittleEndian::read_f64(bytes),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Uint8 => write!(f, "uint8"),
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Uint16 => write!(f, "uint16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Uint32 => write!(f, "uint32"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
        }
    }
}

/// Geometry and scaling metadata of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeHeader {
    /// Voxel counts along i, j, k
    pub dims: [usize; 3],
    pub datatype: DataType,
    /// Voxel spacing in millimetres
    pub pixdim: [f32; 3],
    /// Voxel-to-world (RAS, mm) transform rows, as NIfTI srow_x/y/z
    pub affine: [[f64; 4]; 3],
    pub scl_slope: f32,
    pub scl_inter: f32,
    pub intent_code: i16,
}

impl VolumeHeader {
    /// Header with unit spacing and an identity (RAS) transform.
    pub fn new(dims: [usize; 3], datatype: DataType) -> Self {
        Self {
            dims,
            datatype,
            pixdim: [1.0, 1.0, 1.0],
            affine: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            scl_slope: 1.0,
            scl_inter: 0.0,
            intent_code: 0,
        }
    }

    pub fn with_affine(mut self, affine: [[f64; 4]; 3]) -> Self {
        self.affine = affine;
        self
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.voxel_count() * self.datatype.bytes_per_voxel()
    }

    /// For each world axis (R, A, S), the 1-based voxel axis running along it,
    /// negated when the voxel axis points the opposite way.
    pub fn perm_ras(&self) -> [i8; 3] {
        let mut perm = [0i8; 3];
        let mut used = [false; 3];

        // Strongest columns first so an oblique axis cannot steal a world axis
        // from a nearly aligned one.
        let mut columns: Vec<(usize, f64)> = (0..3)
            .map(|v| {
                let strongest = (0..3)
                    .map(|w| self.affine[w][v].abs())
                    .fold(0.0, f64::max);
                (v, strongest)
            })
            .collect();
        columns.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (v, _) in columns {
            let mut best: Option<usize> = None;
            for w in 0..3 {
                if used[w] {
                    continue;
                }
                match best {
                    Some(b) if self.affine[b][v].abs() >= self.affine[w][v].abs() => {}
                    _ => best = Some(w),
                }
            }
            if let Some(w) = best {
                used[w] = true;
                let axis = (v + 1) as i8;
                perm[w] = if self.affine[w][v] < 0.0 { -axis } else { axis };
            }
        }

        perm
    }

    /// True iff the volume already has the canonical 256³ LIA layout.
    pub fn is_conformed(&self) -> bool {
        self.dims == [CONFORMED_DIM; 3] && self.perm_ras() == CONFORMED_PERM_RAS
    }

    /// World coordinate of the centre of the voxel grid.
    pub fn center_world(&self) -> [f64; 3] {
        let c = [
            (self.dims[0] as f64 - 1.0) / 2.0,
            (self.dims[1] as f64 - 1.0) / 2.0,
            (self.dims[2] as f64 - 1.0) / 2.0,
        ];
        let mut out = [0.0; 3];
        for (w, row) in self.affine.iter().enumerate() {
            out[w] = row[0] * c[0] + row[1] * c[1] + row[2] * c[2] + row[3];
        }
        out
    }
}

/// A 3-D image: header metadata plus its raw little-endian voxel buffer
#[derive(Debug, Clone)]
pub struct Volume {
    pub name: String,
    header: VolumeHeader,
    img: Vec<u8>,
    /// Scalar colormap name, used when no label table is installed
    pub colormap: String,
    pub label_colormap: Option<LabelColormap>,
    pub opacity: f32,
}

impl Volume {
    pub fn new(name: impl Into<String>, header: VolumeHeader, img: Vec<u8>) -> Result<Self> {
        check_buffer(&header, img.len())?;
        Ok(Self {
            name: name.into(),
            header,
            img,
            colormap: "gray".to_string(),
            label_colormap: None,
            opacity: 1.0,
        })
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn dims(&self) -> [usize; 3] {
        self.header.dims
    }

    pub fn perm_ras(&self) -> [i8; 3] {
        self.header.perm_ras()
    }

    pub fn is_conformed(&self) -> bool {
        self.header.is_conformed()
    }

    pub fn img(&self) -> &[u8] {
        &self.img
    }

    /// Voxel bytes for in-place edits; the buffer length cannot change.
    pub fn img_mut(&mut self) -> &mut [u8] {
        &mut self.img
    }

    pub fn into_img(self) -> Vec<u8> {
        self.img
    }

    /// Same geometry and metadata, zero-filled buffer, no colormap state.
    pub fn clone_geometry(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header: self.header.clone(),
            img: vec![0; self.img.len()],
            colormap: "gray".to_string(),
            label_colormap: None,
            opacity: 1.0,
        }
    }

    pub fn zero_image(&mut self) {
        self.img.iter_mut().for_each(|b| *b = 0);
    }

    pub fn set_scaling(&mut self, slope: f32, intercept: f32) {
        self.header.scl_slope = slope;
        self.header.scl_inter = intercept;
    }

    pub fn set_intent_code(&mut self, code: i16) {
        self.header.intent_code = code;
    }

    /// Install a new buffer, possibly of a different datatype. The geometry
    /// is kept, so the buffer must hold exactly one value per voxel.
    pub fn replace_image(&mut self, datatype: DataType, img: Vec<u8>) -> Result<()> {
        let mut header = self.header.clone();
        header.datatype = datatype;
        check_buffer(&header, img.len())?;
        self.header = header;
        self.img = img;
        Ok(())
    }

    pub fn set_colormap_label(&mut self, colormap: LabelColormap) {
        self.label_colormap = Some(colormap);
    }

    /// Stored voxel value at a flat index, before slope/intercept.
    pub fn raw_value(&self, index: usize) -> f64 {
        let bpv = self.header.datatype.bytes_per_voxel();
        let offset = index * bpv;
        self.header.datatype.decode(&self.img[offset..offset + bpv])
    }

    /// Voxel value at a flat index with slope/intercept applied. A zero
    /// slope means "unscaled", as in NIfTI.
    pub fn voxel_value(&self, index: usize) -> f64 {
        let slope = if self.header.scl_slope == 0.0 {
            1.0
        } else {
            self.header.scl_slope as f64
        };
        self.raw_value(index) * slope + self.header.scl_inter as f64
    }

    /// Voxel value at grid coordinates (i fastest).
    pub fn value_at(&self, i: usize, j: usize, k: usize) -> f64 {
        let [nx, ny, _] = self.header.dims;
        self.voxel_value(i + nx * (j + ny * k))
    }

    /// All scaled values, in storage order.
    pub fn values(&self) -> Vec<f64> {
        (0..self.header.voxel_count()).map(|i| self.voxel_value(i)).collect()
    }
}

fn check_buffer(header: &VolumeHeader, len: usize) -> Result<()> {
    if header.dims.iter().any(|&d| d == 0) {
        return Err(BrainchopError::Validation(format!(
            "Volume dimensions must be non-zero, got {:?}",
            header.dims
        )));
    }
    let expected = header.byte_len();
    if len != expected {
        return Err(BrainchopError::Validation(format!(
            "Buffer holds {} bytes but dims {:?} of {} need {}",
            len, header.dims, header.datatype, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lia_header() -> VolumeHeader {
        VolumeHeader::new([256, 256, 256], DataType::Uint8).with_affine([
            [-1.0, 0.0, 0.0, 128.0],
            [0.0, 0.0, 1.0, -128.0],
            [0.0, -1.0, 0.0, 128.0],
        ])
    }

    #[test]
    fn test_datatype_codes() {
        for dt in [
            DataType::Uint8,
            DataType::Int8,
            DataType::Int16,
            DataType::Uint16,
            DataType::Int32,
            DataType::Uint32,
            DataType::Float32,
            DataType::Float64,
        ] {
            assert_eq!(DataType::from_code(dt.code()).unwrap(), dt);
        }
        assert!(DataType::from_code(1).is_err());
    }

    #[test]
    fn test_identity_perm_ras() {
        let header = VolumeHeader::new([180, 256, 180], DataType::Int16);
        assert_eq!(header.perm_ras(), [1, 2, 3]);
        assert!(!header.is_conformed());
    }

    #[test]
    fn test_lia_is_conformed() {
        let header = lia_header();
        assert_eq!(header.perm_ras(), CONFORMED_PERM_RAS);
        assert!(header.is_conformed());
    }

    #[test]
    fn test_conformed_requires_shape() {
        let mut header = lia_header();
        header.dims = [256, 256, 255];
        assert!(!header.is_conformed());
    }

    #[test]
    fn test_buffer_length_checked() {
        let header = VolumeHeader::new([2, 2, 2], DataType::Int16);
        assert!(Volume::new("ok", header.clone(), vec![0; 16]).is_ok());
        let err = Volume::new("short", header, vec![0; 8]).unwrap_err();
        assert!(matches!(err, BrainchopError::Validation(_)));
    }

    #[test]
    fn test_scaled_values() {
        let mut header = VolumeHeader::new([2, 1, 1], DataType::Int16);
        header.scl_slope = 2.0;
        header.scl_inter = 1.0;
        let mut img = vec![0u8; 4];
        LittleEndian::write_i16(&mut img[0..2], -3);
        LittleEndian::write_i16(&mut img[2..4], 10);
        let vol = Volume::new("v", header, img).unwrap();
        assert_eq!(vol.raw_value(0), -3.0);
        assert_eq!(vol.voxel_value(0), -5.0);
        assert_eq!(vol.value_at(1, 0, 0), 21.0);
    }

    #[test]
    fn test_clone_geometry_is_zeroed() {
        let header = VolumeHeader::new([2, 2, 1], DataType::Uint8);
        let vol = Volume::new("src", header, vec![1, 2, 3, 4]).unwrap();
        let copy = vol.clone_geometry("copy");
        assert_eq!(copy.header(), vol.header());
        assert!(copy.img().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_replace_image_changes_datatype() {
        let header = VolumeHeader::new([2, 2, 1], DataType::Float32);
        let mut vol = Volume::new("src", header, vec![0; 16]).unwrap();
        vol.replace_image(DataType::Uint8, vec![0, 1, 2, 3]).unwrap();
        assert_eq!(vol.header().datatype, DataType::Uint8);
        assert!(vol.replace_image(DataType::Uint8, vec![0; 3]).is_err());
    }
}
