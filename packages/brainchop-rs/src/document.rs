//! Scene documents: what is loaded and how it is displayed.

use crate::error::Result;
use crate::scene::Scene;
use crate::volume::{DataType, Volume};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Export name for a scene saved on `date`
pub fn scene_filename(date: NaiveDate) -> String {
    format!("brainchop_scene_{}.nvd", date.format("%Y-%m-%d"))
}

pub fn scene_filename_today() -> String {
    scene_filename(chrono::Local::now().date_naive())
}

/// Display state of one scene slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEntry {
    pub name: String,
    pub dims: [usize; 3],
    pub datatype: DataType,
    pub pixdim: [f32; 3],
    pub affine: [[f64; 4]; 3],
    pub colormap: String,
    pub opacity: f32,
    /// Annotated label table, when the slot is a labeled overlay
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl From<&Volume> for VolumeEntry {
    fn from(volume: &Volume) -> Self {
        let header = volume.header();
        Self {
            name: volume.name.clone(),
            dims: header.dims,
            datatype: header.datatype,
            pixdim: header.pixdim,
            affine: header.affine,
            colormap: volume.colormap.clone(),
            opacity: volume.opacity,
            labels: volume
                .label_colormap
                .as_ref()
                .map(|c| c.labels.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDocument {
    pub title: String,
    pub created: DateTime<Utc>,
    pub volumes: Vec<VolumeEntry>,
}

impl SceneDocument {
    pub fn from_scene(title: impl Into<String>, scene: &Scene) -> Self {
        Self {
            title: title.into(),
            created: Utc::now(),
            volumes: scene.volumes().iter().map(VolumeEntry::from).collect(),
        }
    }
}

/// Persists a scene document
pub trait SceneWriter {
    fn write_scene(&self, scene: &Scene, path: &Path) -> Result<()>;
}

/// Writes the document as pretty-printed JSON. Voxel data is not embedded;
/// images are saved separately with [`crate::nifti_io::write_volume`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSceneWriter;

impl SceneWriter for JsonSceneWriter {
    fn write_scene(&self, scene: &Scene, path: &Path) -> Result<()> {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("brainchop_scene");
        let document = SceneDocument::from_scene(title, scene);
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(path, json)?;
        log::info!(
            "Wrote scene with {} volumes to {}",
            document.volumes.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeHeader;

    #[test]
    fn test_scene_filename() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 2).unwrap();
        assert_eq!(scene_filename(date), "brainchop_scene_2024-11-02.nvd");
        assert!(scene_filename_today().ends_with(".nvd"));
    }

    #[test]
    fn test_json_writer_lists_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.nvd");

        let header = VolumeHeader::new([2, 2, 2], DataType::Uint8);
        let mut overlay = Volume::new("seg", header.clone(), vec![0; 8]).unwrap();
        overlay.opacity = 0.5;
        let mut scene = Scene::with_volume(Volume::new("t1", header, vec![0; 8]).unwrap());
        scene.add_volume(overlay);

        JsonSceneWriter.write_scene(&scene, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let document: SceneDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(document.title, "scene");
        assert_eq!(document.volumes.len(), 2);
        assert_eq!(document.volumes[0].name, "t1");
        assert_eq!(document.volumes[1].opacity, 0.5);
        assert!(document.volumes[1].labels.is_empty());
    }
}
