//! Messages exchanged between the dispatcher and an execution context.
//!
//! A job is one [`JobRequest`] answered by zero or more `ui` messages and
//! exactly one terminal message: `img` on success, or a `ui` message with a
//! non-empty `modalMessage` on failure. The serde layout matches the JSON
//! message shapes used by browser workers (`cmd` tag, camelCase fields).

use crate::catalog::{InferenceOptions, ModelDescriptor};
use crate::error::BrainchopError;
use crate::volume::{Volume, VolumeHeader};
use serde::{Deserialize, Serialize};

/// The header fields inference needs; nothing else of the scene crosses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NiftiHeaderLite {
    pub datatype_code: i16,
    /// NIfTI `dim` layout: `[ndim, x, y, z]`
    pub dims: Vec<usize>,
}

impl NiftiHeaderLite {
    pub fn from_header(header: &VolumeHeader) -> Self {
        let [x, y, z] = header.dims;
        Self {
            datatype_code: header.datatype.code(),
            dims: vec![3, x, y, z],
        }
    }

    pub fn spatial_dims(&self) -> Option<[usize; 3]> {
        match self.dims.as_slice() {
            [_, x, y, z, ..] => Some([*x, *y, *z]),
            _ => None,
        }
    }

    pub fn voxel_count(&self) -> usize {
        self.spatial_dims()
            .map(|d| d.iter().product())
            .unwrap_or(0)
    }
}

/// Immutable snapshot of everything one job needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub opts: InferenceOptions,
    #[serde(rename = "modelEntry")]
    pub model: ModelDescriptor,
    #[serde(rename = "niftiHeader")]
    pub header: NiftiHeaderLite,
    /// Private copy of the voxel buffer; the scene keeps its own.
    #[serde(rename = "niftiImage")]
    pub image: Vec<u8>,
}

impl JobRequest {
    pub fn snapshot(opts: InferenceOptions, model: ModelDescriptor, volume: &Volume) -> Self {
        Self {
            opts,
            model,
            header: NiftiHeaderLite::from_header(volume.header()),
            image: volume.img().to_vec(),
        }
    }
}

/// Progress channel of a `ui` message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    /// No progress information
    None,
    /// Completed fraction in `0.0..=1.0`
    Fraction(f64),
    /// The execution context ran out of memory. Not terminal on its own.
    OutOfMemory,
}

impl Progress {
    /// Interpret a raw `progressFrac`: NaN signals out-of-memory, negative
    /// values mean "no progress".
    pub fn from_raw(frac: f64) -> Self {
        if frac.is_nan() {
            Progress::OutOfMemory
        } else if frac < 0.0 {
            Progress::None
        } else {
            Progress::Fraction(frac.min(1.0))
        }
    }

    pub fn to_raw(self) -> f64 {
        match self {
            Progress::None => -1.0,
            Progress::Fraction(f) => f,
            Progress::OutOfMemory => f64::NAN,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::None
    }
}

/// JSON has no NaN, so out-of-memory travels as `null`.
mod progress_frac {
    use super::Progress;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(progress: &Progress, s: S) -> Result<S::Ok, S::Error> {
        match progress {
            Progress::OutOfMemory => s.serialize_none(),
            other => s.serialize_f64(other.to_raw()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Progress, D::Error> {
        let raw: Option<f64> = Option::deserialize(d)?;
        Ok(Progress::from_raw(raw.unwrap_or(f64::NAN)))
    }
}

/// Progress, status, telemetry or fatal report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "progressFrac", with = "progress_frac", default)]
    pub progress: Progress,
    /// Non-empty means the job failed
    #[serde(default)]
    pub modal_message: String,
    /// Run statistics, present only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_data: Option<serde_json::Value>,
}

impl UiMessage {
    /// Build from the raw four-field form used by browser callbacks.
    pub fn from_raw(
        message: impl Into<String>,
        progress_frac: f64,
        modal_message: impl Into<String>,
        stat_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            message: message.into(),
            progress: Progress::from_raw(progress_frac),
            modal_message: modal_message.into(),
            stat_data,
        }
    }

    pub fn progress(message: impl Into<String>, fraction: f64) -> Self {
        Self {
            message: message.into(),
            progress: Progress::from_raw(fraction),
            ..Default::default()
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            ..Default::default()
        }
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            progress: Progress::OutOfMemory,
            ..Default::default()
        }
    }

    pub fn fatal(modal_message: impl Into<String>) -> Self {
        Self {
            modal_message: modal_message.into(),
            ..Default::default()
        }
    }

    pub fn telemetry(stat_data: serde_json::Value) -> Self {
        Self {
            stat_data: Some(stat_data),
            ..Default::default()
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.modal_message.is_empty()
    }

    /// The out-of-memory report as an error value; the job itself goes on.
    pub fn resource_error(&self) -> Option<BrainchopError> {
        match self.progress {
            Progress::OutOfMemory => Some(BrainchopError::Resource(self.message.clone())),
            _ => None,
        }
    }
}

/// Terminal success: the raw label buffer plus what overlay synthesis needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMessage {
    pub img: Vec<u8>,
    pub opts: InferenceOptions,
    pub model_entry: ModelDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum WorkerMessage {
    Ui(UiMessage),
    Img(ImageMessage),
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkerMessage::Ui(ui) => ui.is_fatal(),
            WorkerMessage::Img(_) => true,
        }
    }
}
