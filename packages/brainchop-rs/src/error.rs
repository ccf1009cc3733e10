use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrainchopError {
    /// Volume geometry is inconsistent or a resample failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A job was requested while another one is still active.
    #[error("A segmentation is already in progress (job {0})")]
    Concurrency(String),

    /// The execution context ran out of memory.
    #[error("Memory issue detected: {0}")]
    Resource(String),

    #[error("Inference failed: {0}")]
    FatalInference(String),

    /// Palette and model output disagree. Never fatal.
    #[error("Label mismatch: {0}")]
    DataMismatch(String),

    #[error("Failed to load colormap: {0}")]
    Palette(String),

    #[error("Unsupported datatype code: {0}")]
    UnsupportedDatatype(i16),

    #[error("Invalid configuration value: {0}")]
    Config(String),

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrainchopError>;
