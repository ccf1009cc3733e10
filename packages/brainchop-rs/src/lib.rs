pub mod error;
pub mod profiling;
pub mod volume;
pub mod palette;
pub mod catalog;
pub mod scene;
pub mod conform;
pub mod protocol;
pub mod dispatcher;
pub mod overlay;
pub mod multiview;
pub mod input;
pub mod notify;
pub mod diagnostics;
pub mod document;
pub mod config;
pub mod nifti_io;
pub mod session;

pub use catalog::{InferenceOptions, ModelCatalog, ModelDescriptor};
pub use config::SessionConfig;
pub use conform::{ConformOutcome, ConformanceGate, Conformer, ResliceConformer};
pub use dispatcher::{
    ExecutionMode, InferenceBackend, InferenceCallbacks, InferenceDispatcher, JobContext, JobId,
    JobOutcome, JobState,
};
pub use error::{BrainchopError, Result};
pub use multiview::{MultiViewRenderer, RenderTarget, SceneRenderer};
pub use document::{JsonSceneWriter, SceneWriter};
pub use overlay::{DrawEdit, LabelCounts, LabelMismatch, OverlaySynthesizer};
pub use palette::{FsPaletteSource, LabelPalette, PaletteSource};
pub use protocol::{JobRequest, Progress, UiMessage, WorkerMessage};
pub use scene::Scene;
pub use session::Session;
pub use volume::{DataType, Volume, VolumeHeader};
