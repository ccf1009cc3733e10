//! Viewer session: scene, renderer, dispatcher and the glue between them.
//!
//! [`Session`] owns the interactive state. Job messages are handled by
//! [`SessionHandler`], which is kept apart from the dispatcher so both can be
//! borrowed at once while a job reports.

use crate::catalog::{InferenceOptions, ModelCatalog, ModelDescriptor};
use crate::config::SessionConfig;
use crate::conform::{ConformOutcome, ConformanceGate, ResliceConformer};
use crate::diagnostics::Diagnostics;
use crate::document::{self, SceneWriter};
use crate::dispatcher::{
    ExecutionMode, InferenceBackend, InferenceCallbacks, InferenceDispatcher, JobId, JobOutcome,
};
use crate::error::{BrainchopError, Result};
use crate::multiview::{MultiViewRenderer, RenderTarget, SceneRenderer, Size};
use crate::nifti_io;
use crate::notify::Notifier;
use crate::overlay::{self, DrawEdit, OverlaySynthesizer};
use crate::palette::PaletteSource;
use crate::protocol::{ImageMessage, JobRequest, Progress, UiMessage};
use crate::scene::Scene;
use crate::volume::Volume;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MEMORY_ISSUE_MESSAGE: &str = "Memory issue detected. Try a different model or smaller image.";

/// Applies job messages to the scene and the user-facing state
pub struct SessionHandler<T: RenderTarget, P: PaletteSource, N: Notifier> {
    scene: Scene,
    renderer: MultiViewRenderer<T>,
    notifier: N,
    diagnostics: Diagnostics,
    synthesizer: OverlaySynthesizer<P>,
    status: String,
    progress: Option<f64>,
    memory_issue: bool,
}

impl<T: RenderTarget, P: PaletteSource, N: Notifier> SessionHandler<T, P, N> {
    /// Hand the scene to the render target and redraw every view.
    fn refresh(&mut self) {
        self.renderer.target_mut().update_scene(&self.scene);
        self.renderer.redraw();
    }

    fn show_overlay(&mut self, image: ImageMessage) -> Result<()> {
        self.scene.close_overlays();
        let source = self
            .scene
            .primary()
            .ok_or_else(|| BrainchopError::Validation("No volume loaded".to_string()))?;

        let overlay =
            self.synthesizer
                .synthesize(source, image.img, &image.model_entry, &image.opts)?;

        if let Some(err) = &overlay.palette_error {
            self.notifier.error(err);
        }
        self.diagnostics.set_label_mismatch(overlay.mismatch.as_ref());
        self.scene.add_volume(overlay.volume);
        self.refresh();
        Ok(())
    }
}

impl<T: RenderTarget, P: PaletteSource, N: Notifier> InferenceCallbacks
    for SessionHandler<T, P, N>
{
    fn on_ui(&mut self, message: UiMessage) {
        if !message.message.is_empty() {
            log::info!("{}", message.message);
            self.status = message.message.clone();
        }

        if let Some(err) = message.resource_error() {
            log::warn!("{}", err);
            self.memory_issue = true;
            self.notifier.error(MEMORY_ISSUE_MESSAGE);
        } else if let Progress::Fraction(frac) = message.progress {
            self.progress = Some(frac);
        }

        if message.is_fatal() {
            self.progress = None;
            self.notifier.error(&message.modal_message);
        }

        if let Some(stat_data) = &message.stat_data {
            let empty = match stat_data {
                serde_json::Value::Object(map) => map.is_empty(),
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Null => true,
                _ => false,
            };
            if !empty {
                if let Err(e) = self.diagnostics.record_telemetry(stat_data) {
                    log::warn!("Ignoring malformed telemetry: {}", e);
                }
            }
        }
    }

    fn on_image(&mut self, image: ImageMessage) {
        self.progress = None;
        match self.show_overlay(image) {
            Ok(()) => self.notifier.success("Segmentation completed successfully!"),
            Err(e) => self
                .notifier
                .error(&format!("Failed to visualize segmentation: {}", e)),
        }
    }
}

pub struct Session<T: RenderTarget, P: PaletteSource, N: Notifier> {
    dispatcher: InferenceDispatcher,
    handler: SessionHandler<T, P, N>,
    catalog: ModelCatalog,
    options: InferenceOptions,
    gate: ConformanceGate<ResliceConformer>,
    mode: ExecutionMode,
    selected_model: Option<usize>,
}

impl<T: RenderTarget, P: PaletteSource, N: Notifier> Session<T, P, N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        target: T,
        view_sizes: [Size; 4],
        palettes: P,
        notifier: N,
        catalog: ModelCatalog,
        options: InferenceOptions,
        config: &SessionConfig,
    ) -> Self {
        let synthesizer = OverlaySynthesizer::new(palettes)
            .with_known_colormaps(target.colormaps())
            .with_fallback_colormap(config.fallback_colormap.clone())
            .with_opacity(config.overlay_opacity);
        let mode = if config.use_worker {
            ExecutionMode::Worker
        } else {
            ExecutionMode::InProcess
        };

        Self {
            dispatcher: InferenceDispatcher::new(backend),
            handler: SessionHandler {
                scene: Scene::new(),
                renderer: MultiViewRenderer::new(target, view_sizes),
                notifier,
                diagnostics: Diagnostics::new(),
                synthesizer,
                status: String::new(),
                progress: None,
                memory_issue: false,
            },
            catalog,
            options,
            gate: ConformanceGate::new(config.conformer()),
            mode,
            selected_model: None,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.handler.scene
    }

    pub fn renderer(&self) -> &MultiViewRenderer<T> {
        &self.handler.renderer
    }

    pub fn notifier(&self) -> &N {
        &self.handler.notifier
    }

    pub fn dispatcher(&self) -> &InferenceDispatcher {
        &self.dispatcher
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Last status line reported by a job
    pub fn status(&self) -> &str {
        &self.handler.status
    }

    pub fn progress(&self) -> Option<f64> {
        self.handler.progress
    }

    pub fn memory_issue(&self) -> bool {
        self.handler.memory_issue
    }

    /// Replace everything shown with a freshly loaded image.
    pub fn load_volume(&mut self, volume: Volume) {
        log::info!("Loaded '{}' {:?}", volume.name, volume.dims());
        self.handler.scene.load(volume);
        self.handler.memory_issue = false;
        self.handler.refresh();
    }

    pub fn redraw(&mut self) {
        self.handler.renderer.redraw();
    }

    pub fn resize(&mut self, view_sizes: [Size; 4]) {
        self.handler.renderer.resize(view_sizes);
    }

    pub fn close_overlays(&mut self) -> usize {
        let removed = self.handler.scene.close_overlays();
        if removed > 0 {
            self.handler.refresh();
        }
        removed
    }

    /// Opacity of a scene slot (0 is the source image, 1 the overlay)
    pub fn set_opacity(&mut self, index: usize, opacity: f32) -> bool {
        let changed = self.handler.scene.set_opacity(index, opacity);
        if changed {
            self.handler.refresh();
        }
        changed
    }

    /// An overlay opacity slider moved: applies to the current overlay and
    /// to every overlay created afterwards.
    pub fn set_overlay_slider(&mut self, slider: u8) {
        let opacity = slider as f32 / 255.0;
        self.handler.synthesizer.set_opacity(opacity);
        self.set_opacity(1, opacity);
    }

    /// Run the model at `index` (or the default model) on the loaded image.
    pub fn select_model(&mut self, index: Option<usize>) -> Result<JobId> {
        let (resolved, model) = self.resolve_model(index)?;
        self.selected_model = Some(resolved);

        if let Some(active) = self.dispatcher.active_job() {
            self.handler
                .notifier
                .warning("A segmentation is already in progress");
            return Err(BrainchopError::Concurrency(active.to_string()));
        }

        if self.handler.scene.is_empty() {
            self.handler
                .notifier
                .warning("Please load a brain image first");
            return Err(BrainchopError::Validation("No volume loaded".to_string()));
        }

        self.handler.scene.close_overlays();
        match self.gate.ensure_conformed(&mut self.handler.scene) {
            Ok(ConformOutcome::Resampled) => self.handler.refresh(),
            Ok(ConformOutcome::AlreadyConformed) => {}
            Err(e) => {
                self.handler
                    .notifier
                    .error(&format!("Failed to conform volume: {}", e));
                return Err(e);
            }
        }

        self.handler.memory_issue = false;
        self.handler.progress = Some(0.0);
        self.handler.notifier.info(&format!(
            "Running segmentation with model: {}",
            model.model_name
        ));

        let primary = self
            .handler
            .scene
            .primary()
            .ok_or_else(|| BrainchopError::Validation("No volume loaded".to_string()))?;
        let request = JobRequest::snapshot(self.options.clone(), model, primary);

        match self.dispatcher.run(request, self.mode, &mut self.handler) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.handler.progress = None;
                match &e {
                    BrainchopError::Concurrency(_) => self
                        .handler
                        .notifier
                        .warning("A segmentation is already in progress"),
                    other => self.handler.notifier.error(&other.to_string()),
                }
                Err(e)
            }
        }
    }

    fn resolve_model(&self, index: Option<usize>) -> Result<(usize, ModelDescriptor)> {
        let model = self
            .catalog
            .resolve(index)
            .cloned()
            .ok_or_else(|| BrainchopError::Config("Model catalog is empty".to_string()))?;
        let resolved = self
            .catalog
            .models()
            .iter()
            .position(|m| *m == model)
            .unwrap_or(0);
        Ok((resolved, model))
    }

    /// Switch between worker and in-process execution. With an image and a
    /// model already selected, the model is run again in the new mode.
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) -> Result<Option<JobId>> {
        self.mode = mode;
        log::info!("Execution mode set to {}", mode);

        match self.selected_model {
            Some(index) if !self.handler.scene.is_empty() && !self.dispatcher.is_busy() => {
                self.select_model(Some(index)).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Deliver pending worker messages. Call once per event-loop turn.
    pub fn pump(&mut self) -> usize {
        self.dispatcher.pump(&mut self.handler)
    }

    /// Deliver worker messages until the active job ends.
    pub async fn wait(&mut self) -> Option<JobOutcome> {
        self.dispatcher.wait(&mut self.handler).await
    }

    /// Diagnostics text for a bug report, or `None` (with a warning) when no
    /// job has reported statistics yet.
    pub fn diagnostics_report(&mut self) -> Option<String> {
        match self.handler.diagnostics.take_report() {
            Some(report) => {
                self.handler.notifier.success("Diagnostics ready");
                Some(report)
            }
            None => {
                self.handler.notifier.warning(
                    "No diagnostic data available. Run a model first to generate diagnostics.",
                );
                None
            }
        }
    }

    /// Paint a drawing into the current overlay: masked voxels become label 1
    /// ([`DrawEdit::Append`]) or background ([`DrawEdit::Delete`]). An empty
    /// mask means nothing was drawn.
    pub fn apply_drawing(&mut self, mask: &[u8], edit: DrawEdit) -> Result<()> {
        if self.handler.scene.len() < 2 {
            self.handler.notifier.error(
                "No segmentation open. Use the Model dropdown to generate one first.",
            );
            return Err(BrainchopError::Validation(
                "No segmentation overlay in the scene".to_string(),
            ));
        }
        if mask.is_empty() {
            self.handler
                .notifier
                .warning("No drawing. Select a drawing mode from the Draw dropdown first.");
            return Err(BrainchopError::Validation("Drawing is empty".to_string()));
        }

        let applied = match self.handler.scene.overlay_mut() {
            Some(target) => overlay::apply_mask(target, mask, edit),
            None => Err(BrainchopError::Validation(
                "No segmentation overlay in the scene".to_string(),
            )),
        };
        if let Err(e) = applied {
            self.handler
                .notifier
                .error(&format!("Failed to apply drawing: {}", e));
            return Err(e);
        }

        self.handler.notifier.success(match edit {
            DrawEdit::Append => "Drawing added to segmentation",
            DrawEdit::Delete => "Drawing removed from segmentation",
        });
        self.handler.refresh();
        Ok(())
    }

    /// Save the scene document into `dir` under today's scene name.
    pub fn save_scene<W: SceneWriter, D: AsRef<Path>>(
        &mut self,
        writer: &W,
        dir: D,
    ) -> Result<PathBuf> {
        if self.handler.scene.is_empty() {
            self.handler
                .notifier
                .warning("No scene to save. Load an image first.");
            return Err(BrainchopError::Validation("No volume loaded".to_string()));
        }

        let filename = document::scene_filename_today();
        let path = dir.as_ref().join(&filename);
        match writer.write_scene(&self.handler.scene, &path) {
            Ok(()) => {
                self.handler
                    .notifier
                    .success(&format!("Scene saved as {}", filename));
                Ok(path)
            }
            Err(e) => {
                self.handler
                    .notifier
                    .error(&format!("Failed to save scene: {}", e));
                Err(e)
            }
        }
    }

    /// Write the current overlay into `dir` under today's export name.
    pub fn save_segmentation<D: AsRef<Path>>(&mut self, dir: D) -> Result<PathBuf> {
        let Some(overlay) = self.handler.scene.overlay() else {
            self.handler
                .notifier
                .warning("No segmentation to save. Run a model first.");
            return Err(BrainchopError::Validation(
                "No segmentation overlay in the scene".to_string(),
            ));
        };

        let path = dir.as_ref().join(nifti_io::segmentation_filename_today());
        match nifti_io::write_volume(overlay, &path) {
            Ok(()) => {
                self.handler
                    .notifier
                    .success(&format!("Segmentation saved to {}", path.display()));
                Ok(path)
            }
            Err(e) => {
                self.handler
                    .notifier
                    .error(&format!("Failed to save segmentation: {}", e));
                Err(e)
            }
        }
    }
}
