//! Conformance gate: inference only runs on 256³ LIA volumes.
//!
//! The gate is a pure check plus an optional swap of scene slot 0. Reslicing
//! itself sits behind [`Conformer`] so callers can plug in another resampler.

use crate::error::{BrainchopError, Result};
use crate::profile_scope;
use crate::scene::Scene;
use crate::volume::{DataType, Volume, VolumeHeader, CONFORMED_DIM};
use nalgebra::{Matrix4, Vector4};
use rayon::prelude::*;

/// True iff `volume` already has the canonical 256³ LIA layout.
pub fn is_conformed(volume: &Volume) -> bool {
    volume.is_conformed()
}

/// Produces a conformed copy of a volume
pub trait Conformer {
    fn conform(&self, volume: &Volume) -> Result<Volume>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Nearest,
    Linear,
}

impl std::fmt::Display for Interpolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interpolation::Nearest => write!(f, "nearest"),
            Interpolation::Linear => write!(f, "linear"),
        }
    }
}

/// Reslices onto a 1 mm 256³ LIA grid centred on the source volume and
/// rescales intensities to `u8`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResliceConformer {
    pub interpolation: Interpolation,
    /// Map the 2nd..98th percentile to 0..255 instead of min..max
    pub robust_range: bool,
}

impl ResliceConformer {
    pub fn new(interpolation: Interpolation, robust_range: bool) -> Self {
        Self {
            interpolation,
            robust_range,
        }
    }

    /// Voxel-to-world rows of the conformed grid sharing `center` with the source.
    pub fn target_affine(center: [f64; 3]) -> [[f64; 4]; 3] {
        let half = (CONFORMED_DIM as f64 - 1.0) / 2.0;
        [
            [-1.0, 0.0, 0.0, center[0] + half],
            [0.0, 0.0, 1.0, center[1] - half],
            [0.0, -1.0, 0.0, center[2] + half],
        ]
    }

    fn intensity_range(&self, values: &[f64]) -> (f64, f64) {
        if values.is_empty() {
            return (0.0, 0.0);
        }
        if self.robust_range {
            let mut sorted = values.to_vec();
            let last = sorted.len() - 1;
            let lo_idx = (last as f64 * 0.02).round() as usize;
            let hi_idx = (last as f64 * 0.98).round() as usize;
            let (_, lo, _) = sorted.select_nth_unstable_by(lo_idx, f64::total_cmp);
            let lo = *lo;
            let (_, hi, _) = sorted.select_nth_unstable_by(hi_idx, f64::total_cmp);
            (lo, *hi)
        } else {
            values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
        }
    }
}

#[rustfmt::skip]
fn affine_matrix(rows: &[[f64; 4]; 3]) -> Matrix4<f64> {
    Matrix4::new(
        rows[0][0], rows[0][1], rows[0][2], rows[0][3],
        rows[1][0], rows[1][1], rows[1][2], rows[1][3],
        rows[2][0], rows[2][1], rows[2][2], rows[2][3],
        0.0, 0.0, 0.0, 1.0,
    )
}

struct Sampler<'a> {
    values: &'a [f64],
    dims: [usize; 3],
}

impl Sampler<'_> {
    fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[i + self.dims[0] * (j + self.dims[1] * k)]
    }

    fn nearest(&self, p: &Vector4<f64>) -> Option<f64> {
        let mut idx = [0usize; 3];
        for a in 0..3 {
            let r = p[a].round();
            if r < 0.0 || r >= self.dims[a] as f64 {
                return None;
            }
            idx[a] = r as usize;
        }
        Some(self.at(idx[0], idx[1], idx[2]))
    }

    fn trilinear(&self, p: &Vector4<f64>) -> Option<f64> {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for a in 0..3 {
            let max = (self.dims[a] - 1) as f64;
            if p[a] < 0.0 || p[a] > max {
                return None;
            }
            let f = p[a].floor();
            lo[a] = f as usize;
            hi[a] = (lo[a] + 1).min(self.dims[a] - 1);
            frac[a] = p[a] - f;
        }

        let mut acc = 0.0;
        for corner in 0..8 {
            let pick = |a: usize| corner & (1 << a) != 0;
            let mut w = 1.0;
            let mut c = [0usize; 3];
            for a in 0..3 {
                if pick(a) {
                    w *= frac[a];
                    c[a] = hi[a];
                } else {
                    w *= 1.0 - frac[a];
                    c[a] = lo[a];
                }
            }
            if w > 0.0 {
                acc += w * self.at(c[0], c[1], c[2]);
            }
        }
        Some(acc)
    }
}

impl Conformer for ResliceConformer {
    fn conform(&self, volume: &Volume) -> Result<Volume> {
        profile_scope!("conform::reslice");
        let header = volume.header();

        let source_to_world = affine_matrix(&header.affine);
        let world_to_source = source_to_world.try_inverse().ok_or_else(|| {
            BrainchopError::Validation(format!(
                "Volume '{}' has a singular voxel-to-world transform",
                volume.name
            ))
        })?;

        let target_rows = Self::target_affine(header.center_world());
        let target_to_source = world_to_source * affine_matrix(&target_rows);

        let values = volume.values();
        let (lo, hi) = self.intensity_range(&values);
        let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
        log::debug!(
            "Conforming '{}' {:?} ({}, range {:.3}..{:.3})",
            volume.name,
            header.dims,
            self.interpolation,
            lo,
            hi
        );

        let sampler = Sampler {
            values: &values,
            dims: header.dims,
        };
        let n = CONFORMED_DIM;
        let step_i = target_to_source.column(0).clone_owned();
        let mut out = vec![0u8; n * n * n];

        out.par_chunks_mut(n * n).enumerate().for_each(|(k, slice)| {
            for j in 0..n {
                let row_start = target_to_source * Vector4::new(0.0, j as f64, k as f64, 1.0);
                for i in 0..n {
                    let p = row_start + step_i * i as f64;
                    let sample = match self.interpolation {
                        Interpolation::Nearest => sampler.nearest(&p),
                        Interpolation::Linear => sampler.trilinear(&p),
                    };
                    if let Some(v) = sample {
                        slice[i + n * j] = ((v - lo) * scale).clamp(0.0, 255.0).round() as u8;
                    }
                }
            }
        });

        let mut conformed_header = VolumeHeader::new([n; 3], DataType::Uint8).with_affine(target_rows);
        conformed_header.intent_code = header.intent_code;

        let mut conformed = Volume::new(volume.name.clone(), conformed_header, out)?;
        conformed.colormap = volume.colormap.clone();
        conformed.opacity = volume.opacity;
        Ok(conformed)
    }
}

/// What the gate did to slot 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConformOutcome {
    AlreadyConformed,
    Resampled,
}

impl std::fmt::Display for ConformOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConformOutcome::AlreadyConformed => write!(f, "already conformed"),
            ConformOutcome::Resampled => write!(f, "resampled"),
        }
    }
}

pub struct ConformanceGate<C: Conformer = ResliceConformer> {
    conformer: C,
}

impl Default for ConformanceGate<ResliceConformer> {
    fn default() -> Self {
        Self::new(ResliceConformer::default())
    }
}

impl<C: Conformer> ConformanceGate<C> {
    pub fn new(conformer: C) -> Self {
        Self { conformer }
    }

    /// Conform a single volume, returning it unchanged when already conformed.
    pub fn conform_volume(&self, volume: Volume) -> Result<(Volume, ConformOutcome)> {
        if is_conformed(&volume) {
            return Ok((volume, ConformOutcome::AlreadyConformed));
        }
        let conformed = self.reslice(&volume)?;
        Ok((conformed, ConformOutcome::Resampled))
    }

    /// Make scene slot 0 conformed. On failure the scene is left as it was.
    pub fn ensure_conformed(&self, scene: &mut Scene) -> Result<ConformOutcome> {
        let primary = scene
            .primary()
            .ok_or_else(|| BrainchopError::Validation("No volume loaded".to_string()))?;

        if is_conformed(primary) {
            log::debug!("'{}' is already conformed", primary.name);
            return Ok(ConformOutcome::AlreadyConformed);
        }

        let conformed = self.reslice(primary)?;
        scene.replace_primary(conformed)?;
        log::info!("Conformed slot 0 to {}³ LIA", CONFORMED_DIM);
        Ok(ConformOutcome::Resampled)
    }

    fn reslice(&self, volume: &Volume) -> Result<Volume> {
        let conformed = self.conformer.conform(volume).map_err(|e| match e {
            BrainchopError::Validation(msg) => BrainchopError::Validation(msg),
            other => BrainchopError::Validation(format!("Conform failed: {}", other)),
        })?;

        if !conformed.is_conformed() {
            return Err(BrainchopError::Validation(format!(
                "Conformer returned {:?} with orientation {:?}",
                conformed.dims(),
                conformed.perm_ras()
            )));
        }
        Ok(conformed)
    }
}
