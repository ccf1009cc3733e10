use crate::error::{BrainchopError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Label table shipped alongside a model: one colour and one name per class id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelPalette {
    #[serde(rename = "R")]
    pub r: Vec<u8>,
    #[serde(rename = "G")]
    pub g: Vec<u8>,
    #[serde(rename = "B")]
    pub b: Vec<u8>,
    pub labels: Vec<String>,
}

impl LabelPalette {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// RGB of a class id; black when the colour channels are shorter than the label list.
    pub fn color(&self, class_id: usize) -> [u8; 3] {
        [
            self.r.get(class_id).copied().unwrap_or(0),
            self.g.get(class_id).copied().unwrap_or(0),
            self.b.get(class_id).copied().unwrap_or(0),
        ]
    }
}

/// Label colormap as installed on an overlay volume, with display strings
/// already annotated with voxel counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelColormap {
    #[serde(rename = "R")]
    pub r: Vec<u8>,
    #[serde(rename = "G")]
    pub g: Vec<u8>,
    #[serde(rename = "B")]
    pub b: Vec<u8>,
    pub labels: Vec<String>,
}

/// Where palette resources named by a model descriptor are fetched from
pub trait PaletteSource {
    fn load(&self, locator: &str) -> Result<LabelPalette>;
}

/// Reads palette JSON files relative to a root directory
pub struct FsPaletteSource {
    root: PathBuf,
}

impl FsPaletteSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn resolve(&self, locator: &str) -> PathBuf {
        let trimmed = locator.trim_start_matches("./");
        let path = Path::new(trimmed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl PaletteSource for FsPaletteSource {
    fn load(&self, locator: &str) -> Result<LabelPalette> {
        let path = self.resolve(locator);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| BrainchopError::Palette(format!("{}: {}", path.display(), e)))?;
        let palette: LabelPalette = serde_json::from_str(&text)
            .map_err(|e| BrainchopError::Palette(format!("{}: {}", path.display(), e)))?;
        log::debug!(
            "Loaded palette {} with {} labels",
            path.display(),
            palette.len()
        );
        Ok(palette)
    }
}
