use crate::conform::{Interpolation, ResliceConformer};
use crate::error::{BrainchopError, Result};
use crate::overlay::{DEFAULT_OVERLAY_OPACITY, FALLBACK_COLORMAP};
use crate::palette::FsPaletteSource;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const ENV_USE_WORKER: &str = "BRAINCHOP_USE_WORKER";
pub const ENV_OVERLAY_OPACITY: &str = "BRAINCHOP_OVERLAY_OPACITY";
pub const ENV_FALLBACK_COLORMAP: &str = "BRAINCHOP_FALLBACK_COLORMAP";
pub const ENV_MODELS_ROOT: &str = "BRAINCHOP_MODELS_ROOT";
pub const ENV_CONFORM_LINEAR: &str = "BRAINCHOP_CONFORM_LINEAR";

/// Session settings, from a JSON file and/or environment variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Run inference on a worker task instead of the calling thread
    pub use_worker: bool,
    /// Overlay opacity in `0.0..=1.0`
    pub overlay_opacity: f32,
    /// Colormap for palette-less models when the requested one is unknown
    pub fallback_colormap: String,
    /// Directory model assets and palettes are resolved against
    pub models_root: PathBuf,
    /// Trilinear instead of nearest-neighbour conforming
    pub conform_linear: bool,
    /// Robust (2..98 %) intensity range when conforming
    pub conform_robust: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_worker: true,
            overlay_opacity: DEFAULT_OVERLAY_OPACITY,
            fallback_colormap: FALLBACK_COLORMAP.to_string(),
            models_root: PathBuf::from("."),
            conform_linear: false,
            conform_robust: false,
        }
    }
}

impl SessionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Defaults overridden by environment variables (and a `.env` file, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `BRAINCHOP_*` variable names.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_USE_WORKER) {
            self.use_worker = parse_flag(ENV_USE_WORKER, &v)?;
        }
        if let Some(v) = lookup(ENV_OVERLAY_OPACITY) {
            self.overlay_opacity = v.trim().parse().map_err(|_| {
                BrainchopError::Config(format!("{} must be a number, got '{}'", ENV_OVERLAY_OPACITY, v))
            })?;
        }
        if let Some(v) = lookup(ENV_FALLBACK_COLORMAP) {
            self.fallback_colormap = v.trim().to_lowercase();
        }
        if let Some(v) = lookup(ENV_MODELS_ROOT) {
            self.models_root = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_CONFORM_LINEAR) {
            self.conform_linear = parse_flag(ENV_CONFORM_LINEAR, &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(BrainchopError::Config(format!(
                "overlay opacity must be within 0..1, got {}",
                self.overlay_opacity
            )));
        }
        if self.fallback_colormap.is_empty() {
            return Err(BrainchopError::Config(
                "fallback colormap must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn conformer(&self) -> ResliceConformer {
        let interpolation = if self.conform_linear {
            Interpolation::Linear
        } else {
            Interpolation::Nearest
        };
        ResliceConformer::new(interpolation, self.conform_robust)
    }

    /// Palette files named by model descriptors, looked up under `models_root`.
    pub fn palette_source(&self) -> FsPaletteSource {
        FsPaletteSource::new(&self.models_root)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BrainchopError::Config(format!(
            "{} must be true or false, got '{}'",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(config.use_worker);
        assert_eq!(config.overlay_opacity, 0.5);
        assert_eq!(config.fallback_colormap, "actc");
        assert_eq!(config.conformer().interpolation, Interpolation::Nearest);
    }

    #[test]
    fn test_overrides() {
        let config = SessionConfig::default()
            .with_overrides(lookup(&[
                (ENV_USE_WORKER, "false"),
                (ENV_OVERLAY_OPACITY, "0.8"),
                (ENV_FALLBACK_COLORMAP, "Jet"),
                (ENV_MODELS_ROOT, "/srv/models"),
                (ENV_CONFORM_LINEAR, "1"),
            ]))
            .unwrap();
        assert!(!config.use_worker);
        assert_eq!(config.overlay_opacity, 0.8);
        assert_eq!(config.fallback_colormap, "jet");
        assert_eq!(config.models_root, PathBuf::from("/srv/models"));
        assert_eq!(config.conformer().interpolation, Interpolation::Linear);
    }

    #[test]
    fn test_palette_source_uses_models_root() {
        let config = SessionConfig::default()
            .with_overrides(lookup(&[(ENV_MODELS_ROOT, "/srv/models")]))
            .unwrap();
        assert_eq!(
            config.palette_source().resolve("./gwm/colormap3.json"),
            PathBuf::from("/srv/models/gwm/colormap3.json")
        );
    }

    #[test]
    fn test_invalid_overrides() {
        assert!(SessionConfig::default()
            .with_overrides(lookup(&[(ENV_USE_WORKER, "maybe")]))
            .is_err());
        assert!(SessionConfig::default()
            .with_overrides(lookup(&[(ENV_OVERLAY_OPACITY, "1.5")]))
            .is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"useWorker": false, "conformRobust": true}"#).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert!(!config.use_worker);
        assert!(config.conform_robust);
        assert_eq!(config.fallback_colormap, "actc");
    }
}
