use crate::error::{BrainchopError, Result};
use crate::volume::Volume;

/// Ordered volume list of the viewer. Slot 0 is the source image, later
/// slots are overlays drawn on top of it.
#[derive(Debug, Default)]
pub struct Scene {
    volumes: Vec<Volume>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(volume: Volume) -> Self {
        Self {
            volumes: vec![volume],
        }
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn primary(&self) -> Option<&Volume> {
        self.volumes.first()
    }

    pub fn overlay(&self) -> Option<&Volume> {
        self.volumes.get(1)
    }

    pub fn overlay_mut(&mut self) -> Option<&mut Volume> {
        self.volumes.get_mut(1)
    }

    pub fn add_volume(&mut self, volume: Volume) {
        log::debug!("Scene: adding '{}' at slot {}", volume.name, self.volumes.len());
        self.volumes.push(volume);
    }

    pub fn remove_volume(&mut self, index: usize) -> Option<Volume> {
        if index < self.volumes.len() {
            let removed = self.volumes.remove(index);
            log::debug!("Scene: removed '{}' from slot {}", removed.name, index);
            Some(removed)
        } else {
            None
        }
    }

    /// Load a new source image, dropping everything previously shown.
    pub fn load(&mut self, volume: Volume) {
        self.volumes.clear();
        self.volumes.push(volume);
    }

    /// Swap slot 0 for `volume`: the old entry is removed before the new one
    /// is added, so both never coexist in the list.
    pub fn replace_primary(&mut self, volume: Volume) -> Result<Volume> {
        let old = self.remove_volume(0).ok_or_else(|| {
            BrainchopError::Validation("No volume loaded".to_string())
        })?;
        self.volumes.insert(0, volume);
        Ok(old)
    }

    /// Remove every overlay, keeping the source image. Returns how many were removed.
    pub fn close_overlays(&mut self) -> usize {
        let mut removed = 0;
        while self.volumes.len() > 1 {
            self.remove_volume(1);
            removed += 1;
        }
        removed
    }

    /// Opacity of the volume at `index`, clamped to `0.0..=1.0`.
    pub fn set_opacity(&mut self, index: usize, opacity: f32) -> bool {
        match self.volumes.get_mut(index) {
            Some(volume) => {
                volume.opacity = opacity.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }
}
