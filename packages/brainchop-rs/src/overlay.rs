//! Turns a raw label buffer into a displayable overlay volume.

use crate::catalog::{InferenceOptions, ModelDescriptor};
use crate::error::{BrainchopError, Result};
use crate::palette::{LabelColormap, LabelPalette, PaletteSource};
use crate::profile_scope;
use crate::volume::{DataType, Volume, INTENT_LABEL};
use rayon::prelude::*;
use serde::Serialize;

/// Categorical colormap used when the requested one is unknown to the renderer.
pub const FALLBACK_COLORMAP: &str = "actc";

/// Overlay opacity when no opacity control is attached.
pub const DEFAULT_OVERLAY_OPACITY: f32 = 0.5;

/// Colormap names a renderer is assumed to know when none are supplied.
pub const DEFAULT_COLORMAPS: &[&str] = &[
    "actc", "bone", "bronze", "cool", "copper", "cubehelix", "freesurfer", "gold", "gray",
    "green", "hot", "hotiron", "hsv", "inferno", "jet", "magma", "plasma", "red", "redyell",
    "roi_i256", "turbo", "viridis", "warm", "winter",
];

const COUNT_CHUNK: usize = 1 << 16;

/// Voxel count per label value, from one pass over the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCounts {
    counts: [u64; 256],
}

impl LabelCounts {
    pub fn from_labels(labels: &[u8]) -> Self {
        let counts = labels
            .par_chunks(COUNT_CHUNK)
            .fold(
                || [0u64; 256],
                |mut acc, chunk| {
                    for &v in chunk {
                        acc[v as usize] += 1;
                    }
                    acc
                },
            )
            .reduce(
                || [0u64; 256],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b.iter()) {
                        *x += y;
                    }
                    a
                },
            );
        Self { counts }
    }

    /// Count for a label value; `None` when the value never occurs.
    pub fn get(&self, value: usize) -> Option<u64> {
        self.counts.get(value).copied().filter(|&c| c > 0)
    }

    /// Number of distinct values present
    pub fn distinct(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Present values in ascending order with their counts
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .map(|(v, &c)| (v as u8, c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelVolume {
    /// Voxel count; voxels are 1 mm³ in a conformed volume
    Count(u64),
    Missing,
}

impl std::fmt::Display for LabelVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelVolume::Count(n) => write!(f, "{} mm3", n),
            LabelVolume::Missing => write!(f, "Missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelEntry {
    pub class_id: usize,
    pub name: String,
    pub color: [u8; 3],
    pub volume: LabelVolume,
}

impl LabelEntry {
    /// Display string, e.g. `"White Matter   41235 mm3"`
    pub fn annotated(&self) -> String {
        format!("{}   {}", self.name, self.volume)
    }
}

/// Palette declared more labels than the model produced (or vice versa)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelMismatch {
    pub observed: usize,
    pub declared: usize,
    /// Declared labels with zero voxels, in palette order
    pub missing: Vec<String>,
}

impl LabelMismatch {
    pub fn note(&self) -> String {
        format!("Failed to Predict Labels - {}", self.missing.join(", "))
    }
}

impl std::fmt::Display for LabelMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.note())
    }
}

impl From<&LabelMismatch> for BrainchopError {
    fn from(mismatch: &LabelMismatch) -> Self {
        BrainchopError::DataMismatch(format!(
            "{} distinct values for {} labels; {}",
            mismatch.observed,
            mismatch.declared,
            mismatch.note()
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayDescriptor {
    pub entries: Vec<LabelEntry>,
}

impl OverlayDescriptor {
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(LabelEntry::annotated).collect()
    }

    pub fn to_colormap(&self, palette: &LabelPalette) -> LabelColormap {
        LabelColormap {
            r: palette.r.clone(),
            g: palette.g.clone(),
            b: palette.b.clone(),
            labels: self.labels(),
        }
    }
}

/// Annotate every palette label with its voxel count. A mismatch between the
/// number of distinct observed values and declared labels yields a note
/// listing the labels that never occur.
pub fn annotate_labels(
    palette: &LabelPalette,
    counts: &LabelCounts,
) -> (OverlayDescriptor, Option<LabelMismatch>) {
    let entries: Vec<LabelEntry> = palette
        .labels
        .iter()
        .enumerate()
        .map(|(class_id, name)| LabelEntry {
            class_id,
            name: name.clone(),
            color: palette.color(class_id),
            volume: counts
                .get(class_id)
                .map(LabelVolume::Count)
                .unwrap_or(LabelVolume::Missing),
        })
        .collect();

    let observed = counts.distinct();
    let mismatch = if observed != palette.len() {
        Some(LabelMismatch {
            observed,
            declared: palette.len(),
            missing: entries
                .iter()
                .filter(|e| e.volume == LabelVolume::Missing)
                .map(|e| e.name.clone())
                .collect(),
        })
    } else {
        None
    };

    if let Some(m) = &mismatch {
        log::error!("{}", BrainchopError::from(m));
    }

    (OverlayDescriptor { entries }, mismatch)
}

/// How a drawing mask changes an overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawEdit {
    /// Masked voxels become label 1
    Append,
    /// Masked voxels become background
    Delete,
}

impl DrawEdit {
    pub fn label(self) -> u8 {
        match self {
            DrawEdit::Append => 1,
            DrawEdit::Delete => 0,
        }
    }
}

/// Write `edit`'s label into every voxel where `mask` is non-zero. Returns
/// the number of masked voxels.
pub fn apply_mask(overlay: &mut Volume, mask: &[u8], edit: DrawEdit) -> Result<usize> {
    let header = overlay.header();
    if header.datatype != DataType::Uint8 {
        return Err(BrainchopError::Validation(format!(
            "Overlay '{}' is {}, expected uint8 labels",
            overlay.name, header.datatype
        )));
    }
    if mask.len() != header.voxel_count() {
        return Err(BrainchopError::Validation(format!(
            "Drawing has {} values but the overlay has {} voxels",
            mask.len(),
            header.voxel_count()
        )));
    }

    let label = edit.label();
    let mut masked = 0;
    for (voxel, _) in overlay
        .img_mut()
        .iter_mut()
        .zip(mask)
        .filter(|(_, m)| **m > 0)
    {
        *voxel = label;
        masked += 1;
    }
    log::debug!("{:?} drawing touched {} voxels", edit, masked);
    Ok(masked)
}

#[derive(Debug, Clone)]
pub struct SynthesizedOverlay {
    pub volume: Volume,
    pub counts: LabelCounts,
    /// Present when a palette was installed
    pub descriptor: Option<OverlayDescriptor>,
    pub mismatch: Option<LabelMismatch>,
    /// Palette fetch error; the overlay then uses a categorical colormap
    pub palette_error: Option<String>,
}

pub struct OverlaySynthesizer<P: PaletteSource> {
    palettes: P,
    known_colormaps: Vec<String>,
    fallback_colormap: String,
    opacity: f32,
}

impl<P: PaletteSource> OverlaySynthesizer<P> {
    pub fn new(palettes: P) -> Self {
        Self {
            palettes,
            known_colormaps: DEFAULT_COLORMAPS.iter().map(|s| s.to_string()).collect(),
            fallback_colormap: FALLBACK_COLORMAP.to_string(),
            opacity: DEFAULT_OVERLAY_OPACITY,
        }
    }

    pub fn with_fallback_colormap(mut self, colormap: impl Into<String>) -> Self {
        self.fallback_colormap = colormap.into();
        self
    }

    pub fn with_known_colormaps(mut self, colormaps: Vec<String>) -> Self {
        self.known_colormaps = colormaps;
        self
    }

    pub fn set_known_colormaps(&mut self, colormaps: Vec<String>) {
        self.known_colormaps = colormaps;
    }

    /// Opacity from an 8-bit slider position
    pub fn with_opacity_slider(mut self, slider: u8) -> Self {
        self.opacity = slider as f32 / 255.0;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Colormap for a palette-less model, lowercased, or the fallback when unknown.
    pub fn categorical_colormap(&self, requested: &str) -> String {
        let name = requested.to_lowercase();
        if self.known_colormaps.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            name
        } else {
            log::debug!("Colormap '{}' unknown, using '{}'", name, self.fallback_colormap);
            self.fallback_colormap.clone()
        }
    }

    pub fn synthesize(
        &self,
        source: &Volume,
        labels: Vec<u8>,
        model: &ModelDescriptor,
        options: &InferenceOptions,
    ) -> Result<SynthesizedOverlay> {
        profile_scope!("overlay::synthesize");

        let voxels = source.header().voxel_count();
        if labels.len() != voxels {
            return Err(BrainchopError::Validation(format!(
                "Label buffer has {} values but the volume has {} voxels",
                labels.len(),
                voxels
            )));
        }

        let mut volume = source.clone_geometry(format!("{} ({})", source.name, model.model_name));
        volume.zero_image();
        volume.set_scaling(1.0, 0.0);
        let counts = LabelCounts::from_labels(&labels);
        volume.replace_image(DataType::Uint8, labels)?;
        log::debug!("{} distinct label values", counts.distinct());

        let mut descriptor = None;
        let mut mismatch = None;
        let mut palette_error = None;

        let palette = match model.colormap_path.as_deref() {
            Some(locator) => match self.palettes.load(locator) {
                Ok(palette) => Some(palette),
                Err(e) => {
                    log::error!("Failed to load palette {}: {}", locator, e);
                    palette_error = Some(e.to_string());
                    None
                }
            },
            None => None,
        };

        match palette {
            Some(palette) => {
                let (desc, miss) = annotate_labels(&palette, &counts);
                volume.set_colormap_label(desc.to_colormap(&palette));
                volume.set_intent_code(INTENT_LABEL);
                descriptor = Some(desc);
                mismatch = miss;
            }
            None => {
                volume.colormap = self.categorical_colormap(&options.atlas_selected_color_table);
            }
        }

        volume.opacity = self.opacity;

        Ok(SynthesizedOverlay {
            volume,
            counts,
            descriptor,
            mismatch,
            palette_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeHeader;
    use std::collections::HashMap;

    struct MapPalettes(HashMap<String, LabelPalette>);

    impl PaletteSource for MapPalettes {
        fn load(&self, locator: &str) -> Result<LabelPalette> {
            self.0
                .get(locator)
                .cloned()
                .ok_or_else(|| BrainchopError::Palette(format!("{} not found", locator)))
        }
    }

    fn palette(labels: &[&str]) -> LabelPalette {
        let n = labels.len();
        LabelPalette {
            r: (0..n as u8).collect(),
            g: vec![0; n],
            b: vec![0; n],
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn synthesizer() -> OverlaySynthesizer<MapPalettes> {
        let mut map = HashMap::new();
        map.insert("gwm.json".to_string(), palette(&["bg", "gm", "wm"]));
        OverlaySynthesizer::new(MapPalettes(map))
    }

    fn source() -> Volume {
        let mut header = VolumeHeader::new([2, 2, 2], DataType::Int16);
        header.scl_slope = 3.0;
        header.scl_inter = 5.0;
        Volume::new("t1", header, vec![9; 16]).unwrap()
    }

    #[test]
    fn test_counts_single_pass() {
        let counts = LabelCounts::from_labels(&[0, 0, 2, 2, 2, 7]);
        assert_eq!(counts.get(0), Some(2));
        assert_eq!(counts.get(2), Some(3));
        assert_eq!(counts.get(1), None);
        assert_eq!(counts.distinct(), 3);
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.iter().collect::<Vec<_>>(), vec![(0, 2), (2, 3), (7, 1)]);
    }

    #[test]
    fn test_counts_span_chunks() {
        let labels: Vec<u8> = (0..COUNT_CHUNK * 3 + 17).map(|i| (i % 4) as u8).collect();
        let counts = LabelCounts::from_labels(&labels);
        assert_eq!(counts.total(), labels.len() as u64);
        assert_eq!(counts.distinct(), 4);
    }

    #[test]
    fn test_annotate_full_match() {
        let counts = LabelCounts::from_labels(&[0, 1, 1, 2]);
        let (desc, mismatch) = annotate_labels(&palette(&["bg", "gm", "wm"]), &counts);
        assert!(mismatch.is_none());
        assert_eq!(desc.labels(), vec!["bg   1 mm3", "gm   2 mm3", "wm   1 mm3"]);
    }

    #[test]
    fn test_annotate_missing_label() {
        let counts = LabelCounts::from_labels(&[0, 0, 0, 0, 2, 2, 2, 2]);
        let (desc, mismatch) = annotate_labels(&palette(&["bg", "gm", "wm"]), &counts);
        assert_eq!(desc.labels(), vec!["bg   4 mm3", "gm   Missing", "wm   4 mm3"]);

        let mismatch = mismatch.unwrap();
        assert_eq!(mismatch.observed, 2);
        assert_eq!(mismatch.declared, 3);
        assert_eq!(mismatch.missing, vec!["gm"]);
        assert_eq!(mismatch.note(), "Failed to Predict Labels - gm");

        match BrainchopError::from(&mismatch) {
            BrainchopError::DataMismatch(text) => {
                assert_eq!(text, "2 distinct values for 3 labels; Failed to Predict Labels - gm")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_apply_mask_append_and_delete() {
        let header = VolumeHeader::new([4, 1, 1], DataType::Uint8);
        let mut overlay = Volume::new("seg", header, vec![0, 2, 2, 0]).unwrap();

        let touched = apply_mask(&mut overlay, &[1, 0, 0, 255], DrawEdit::Append).unwrap();
        assert_eq!(touched, 2);
        assert_eq!(overlay.img(), &[1, 2, 2, 1]);

        apply_mask(&mut overlay, &[0, 1, 0, 0], DrawEdit::Delete).unwrap();
        assert_eq!(overlay.img(), &[1, 0, 2, 1]);
    }

    #[test]
    fn test_apply_mask_rejects_wrong_length() {
        let header = VolumeHeader::new([4, 1, 1], DataType::Uint8);
        let mut overlay = Volume::new("seg", header, vec![0; 4]).unwrap();
        let err = apply_mask(&mut overlay, &[1, 1], DrawEdit::Append).unwrap_err();
        assert!(matches!(err, BrainchopError::Validation(_)));
        assert_eq!(overlay.img(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_synthesize_with_palette() {
        let model = ModelDescriptor::new(3, "Tissue GWM").with_colormap("gwm.json");
        let out = synthesizer()
            .synthesize(&source(), vec![0, 0, 0, 0, 2, 2, 2, 2], &model, &InferenceOptions::default())
            .unwrap();

        let header = out.volume.header();
        assert_eq!(header.datatype, DataType::Uint8);
        assert_eq!(header.scl_slope, 1.0);
        assert_eq!(header.scl_inter, 0.0);
        assert_eq!(header.intent_code, INTENT_LABEL);
        assert_eq!(out.volume.img(), &[0, 0, 0, 0, 2, 2, 2, 2]);
        assert_eq!(out.volume.opacity, DEFAULT_OVERLAY_OPACITY);

        let cmap = out.volume.label_colormap.as_ref().unwrap();
        assert_eq!(cmap.labels[1], "gm   Missing");
        assert_eq!(out.mismatch.unwrap().missing, vec!["gm"]);
        assert!(out.palette_error.is_none());
    }

    #[test]
    fn test_synthesize_rejects_wrong_length() {
        let model = ModelDescriptor::new(3, "m");
        let err = synthesizer()
            .synthesize(&source(), vec![0; 7], &model, &InferenceOptions::default())
            .unwrap_err();
        assert!(matches!(err, BrainchopError::Validation(_)));
    }

    #[test]
    fn test_synthesize_without_palette_uses_categorical() {
        let model = ModelDescriptor::new(1, "Extract the brain");
        let mut opts = InferenceOptions::default();
        opts.atlas_selected_color_table = "Hot".to_string();
        let out = synthesizer()
            .with_opacity_slider(255)
            .synthesize(&source(), vec![1; 8], &model, &opts)
            .unwrap();
        assert_eq!(out.volume.colormap, "hot");
        assert_eq!(out.volume.opacity, 1.0);
        assert!(out.volume.label_colormap.is_none());
        assert_eq!(out.volume.header().intent_code, 0);
    }

    #[test]
    fn test_unknown_colormap_falls_back() {
        let synth = synthesizer();
        assert_eq!(synth.categorical_colormap("Fire"), FALLBACK_COLORMAP);
        assert_eq!(synth.categorical_colormap("Viridis"), "viridis");

        let synth = synthesizer().with_fallback_colormap("jet");
        assert_eq!(synth.categorical_colormap("nope"), "jet");
    }

    #[test]
    fn test_palette_failure_falls_back() {
        let model = ModelDescriptor::new(3, "m").with_colormap("missing.json");
        let out = synthesizer()
            .synthesize(&source(), vec![0; 8], &model, &InferenceOptions::default())
            .unwrap();
        assert!(out.palette_error.is_some());
        assert!(out.descriptor.is_none());
        assert_eq!(out.volume.colormap, FALLBACK_COLORMAP);
    }
}
