use crate::error::{BrainchopError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Model picked when a selection index is out of range.
pub const DEFAULT_MODEL_INDEX: usize = 11;

/// Entry of the model catalog. Fields the pipeline does not interpret are
/// kept in `extra` and forwarded untouched to the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: u32,
    pub model_name: String,
    #[serde(default)]
    pub path: Option<String>,
    /// Palette resource (JSON label table); absent for scalar-output models
    #[serde(default)]
    pub colormap_path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelDescriptor {
    pub fn new(id: u32, model_name: impl Into<String>) -> Self {
        Self {
            id,
            model_name: model_name.into(),
            path: None,
            colormap_path: None,
            description: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_colormap(mut self, colormap_path: impl Into<String>) -> Self {
        self.colormap_path = Some(colormap_path.into());
        self
    }
}

/// Options shared by every job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOptions {
    /// Base URL (or directory) model assets are resolved against
    #[serde(rename = "rootURL", default)]
    pub root_url: String,
    /// Colormap for models without a palette resource
    #[serde(default = "default_color_table")]
    pub atlas_selected_color_table: String,
    #[serde(default)]
    pub telemetry_flag: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_color_table() -> String {
    "Fire".to_string()
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            root_url: String::new(),
            atlas_selected_color_table: default_color_table(),
            telemetry_flag: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl InferenceOptions {
    /// Set the asset root from a page location: query and fragment are
    /// dropped, and loopback hosts collapse to `scheme://host`.
    pub fn with_root_url(mut self, location: &str) -> Self {
        self.root_url = root_url_from(location);
        self
    }
}

pub fn root_url_from(location: &str) -> String {
    let without_fragment = location.split('#').next().unwrap_or(location);
    let base = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);

    let Some((scheme, rest)) = base.split_once("://") else {
        return base.to_string();
    };
    let host = rest.split('/').next().unwrap_or(rest);
    if is_loopback_host(host) {
        format!("{}://{}", scheme, host)
    } else {
        base.to_string()
    }
}

fn is_loopback_host(host: &str) -> bool {
    let hostname = if host.starts_with('[') {
        host.split(']').next().map(|h| format!("{}]", h)).unwrap_or_default()
    } else {
        host.split(':').next().unwrap_or(host).to_string()
    };

    if hostname == "localhost" || hostname == "[::1]" {
        return true;
    }

    let octets: Vec<&str> = hostname.split('.').collect();
    octets.len() == 4
        && octets[0] == "127"
        && octets[1..].iter().all(|o| o.parse::<u8>().is_ok())
}

/// Ordered list of available models
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let models: Vec<ModelDescriptor> = serde_json::from_str(&text)?;
        if models.is_empty() {
            return Err(BrainchopError::Config(format!(
                "Model catalog {} is empty",
                path.display()
            )));
        }
        log::info!("Loaded {} models from {}", models.len(), path.display());
        Ok(Self { models })
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModelDescriptor> {
        self.models.get(index)
    }

    /// Model for a selection index; invalid selections fall back to the
    /// default entry, or the last one for short catalogs.
    pub fn resolve(&self, index: Option<usize>) -> Option<&ModelDescriptor> {
        match index.and_then(|i| self.models.get(i)) {
            Some(model) => Some(model),
            None => self
                .models
                .get(DEFAULT_MODEL_INDEX)
                .or_else(|| self.models.last()),
        }
    }
}
