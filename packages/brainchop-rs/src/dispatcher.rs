// Inference dispatcher - owns the single active segmentation job
//
// Features:
// - At most one job at a time; a second request is rejected, never queued
// - In-process execution on the caller's thread, or a single-use worker task
// - Progress, status, out-of-memory and telemetry forwarding
// - Worker teardown and job release on every terminal branch

use crate::error::{BrainchopError, Result};
use crate::protocol::{ImageMessage, JobRequest, Progress, UiMessage, WorkerMessage};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs a model over one job's voxels. The network itself lives behind this trait.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Return one label per voxel, or a human-readable failure message.
    fn infer(
        &self,
        request: &JobRequest,
        ctx: &mut JobContext<'_>,
    ) -> std::result::Result<Vec<u8>, String>;
}

/// Reporting channel handed to a backend while it runs
pub struct JobContext<'a> {
    emit: &'a mut dyn FnMut(UiMessage),
    cancel: CancellationToken,
}

impl<'a> JobContext<'a> {
    pub fn new(emit: &'a mut dyn FnMut(UiMessage), cancel: CancellationToken) -> Self {
        Self { emit, cancel }
    }

    pub fn progress(&mut self, message: impl Into<String>, fraction: f64) {
        (self.emit)(UiMessage::progress(message, fraction));
    }

    pub fn status(&mut self, text: impl Into<String>) {
        (self.emit)(UiMessage::status(text));
    }

    /// Report memory exhaustion. The job keeps running until it returns.
    pub fn out_of_memory(&mut self, message: impl Into<String>) {
        (self.emit)(UiMessage::out_of_memory(message));
    }

    pub fn telemetry(&mut self, stat_data: serde_json::Value) {
        (self.emit)(UiMessage::telemetry(stat_data));
    }

    /// True once the worker running this job has been torn down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Receives everything a job reports
pub trait InferenceCallbacks {
    fn on_ui(&mut self, message: UiMessage);
    fn on_image(&mut self, image: ImageMessage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    InProcess,
    Worker,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::InProcess => write!(f, "in-process"),
            ExecutionMode::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Requested,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run a backend to completion and turn whatever happens into exactly one
/// terminal message. Non-terminal reports go through `emit`.
pub fn execute_job(
    backend: &dyn InferenceBackend,
    request: &JobRequest,
    emit: &mut dyn FnMut(UiMessage),
    cancel: CancellationToken,
) -> WorkerMessage {
    let expected = request.header.voxel_count();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = JobContext::new(emit, cancel);
        backend.infer(request, &mut ctx)
    }));

    match outcome {
        Ok(Ok(labels)) if labels.len() == expected => WorkerMessage::Img(ImageMessage {
            img: labels,
            opts: request.opts.clone(),
            model_entry: request.model.clone(),
        }),
        Ok(Ok(labels)) => WorkerMessage::Ui(UiMessage::fatal(format!(
            "Model returned {} labels for {} voxels",
            labels.len(),
            expected
        ))),
        Ok(Err(message)) if message.is_empty() => {
            WorkerMessage::Ui(UiMessage::fatal("Segmentation failed"))
        }
        Ok(Err(message)) => WorkerMessage::Ui(UiMessage::fatal(message)),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            WorkerMessage::Ui(UiMessage::fatal(format!("Segmentation failed: {}", detail)))
        }
    }
}

/// A single-use worker: built with its one request, torn down after its
/// terminal message. Dropping the handle terminates the worker.
pub struct WorkerHandle {
    receiver: mpsc::UnboundedReceiver<WorkerMessage>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(backend: Arc<dyn InferenceBackend>, request: JobRequest) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BrainchopError::FatalInference(format!("Failed to start worker: {}", e))
        })?;

        let (tx, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join_handle = runtime.spawn_blocking(move || {
            let progress_tx = tx.clone();
            let mut emit = |ui: UiMessage| {
                let _ = progress_tx.send(WorkerMessage::Ui(ui));
            };
            let terminal = execute_job(backend.as_ref(), &request, &mut emit, token);
            // The receiver is gone once the worker was terminated.
            let _ = tx.send(terminal);
        });

        Ok(Self {
            receiver,
            cancel,
            join_handle: Some(join_handle),
        })
    }

    pub fn try_next(&mut self) -> std::result::Result<WorkerMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub async fn next(&mut self) -> Option<WorkerMessage> {
        self.receiver.recv().await
    }

    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        self.receiver.close();
        if let Some(handle) = self.join_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ActiveJob {
    id: JobId,
    mode: ExecutionMode,
    model_name: String,
    worker: Option<WorkerHandle>,
    started: Instant,
}

/// Owns the single-job slot and drives jobs to their terminal message
pub struct InferenceDispatcher {
    backend: Arc<dyn InferenceBackend>,
    state: JobState,
    active: Option<ActiveJob>,
    last_outcome: Option<JobOutcome>,
}

impl InferenceDispatcher {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            state: JobState::Idle,
            active: None,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_job(&self) -> Option<&JobId> {
        self.active.as_ref().map(|job| &job.id)
    }

    pub fn active_mode(&self) -> Option<ExecutionMode> {
        self.active.as_ref().map(|job| job.mode)
    }

    pub fn last_outcome(&self) -> Option<&JobOutcome> {
        self.last_outcome.as_ref()
    }

    /// Start a job. In-process jobs run to completion before this returns;
    /// worker jobs report through [`pump`](Self::pump) or [`wait`](Self::wait).
    pub fn run(
        &mut self,
        request: JobRequest,
        mode: ExecutionMode,
        callbacks: &mut dyn InferenceCallbacks,
    ) -> Result<JobId> {
        if let Some(active) = &self.active {
            log::warn!(
                "Rejecting {} request for '{}': job {} is still running",
                mode,
                request.model.model_name,
                active.id
            );
            return Err(BrainchopError::Concurrency(active.id.to_string()));
        }

        let id = JobId::new();
        let model_name = request.model.model_name.clone();
        self.state = JobState::Requested;
        log::info!("Job {} requested: model '{}' ({})", id, model_name, mode);

        match mode {
            ExecutionMode::InProcess => {
                self.active = Some(ActiveJob {
                    id: id.clone(),
                    mode,
                    model_name,
                    worker: None,
                    started: Instant::now(),
                });
                self.state = JobState::Running;

                let backend = Arc::clone(&self.backend);
                let terminal = {
                    let mut emit = |ui: UiMessage| callbacks.on_ui(ui);
                    execute_job(backend.as_ref(), &request, &mut emit, CancellationToken::new())
                };
                self.finish(terminal, callbacks);
            }
            ExecutionMode::Worker => {
                let worker = match WorkerHandle::spawn(Arc::clone(&self.backend), request) {
                    Ok(worker) => worker,
                    Err(e) => {
                        log::error!("Job {} could not start: {}", id, e);
                        self.state = JobState::Idle;
                        self.last_outcome = Some(JobOutcome::Failed(e.to_string()));
                        return Err(e);
                    }
                };
                self.active = Some(ActiveJob {
                    id: id.clone(),
                    mode,
                    model_name,
                    worker: Some(worker),
                    started: Instant::now(),
                });
                self.state = JobState::Running;
            }
        }

        Ok(id)
    }

    /// Deliver every message the worker has queued so far without blocking.
    /// Returns the number of messages delivered.
    pub fn pump(&mut self, callbacks: &mut dyn InferenceCallbacks) -> usize {
        let mut delivered = 0;
        loop {
            let next = match self.active.as_mut().and_then(|job| job.worker.as_mut()) {
                Some(worker) => worker.try_next(),
                None => return delivered,
            };
            match next {
                Ok(message) => {
                    delivered += 1;
                    if self.deliver(Some(message), callbacks) {
                        return delivered;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return delivered,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.deliver(None, callbacks);
                    return delivered;
                }
            }
        }
    }

    /// Deliver worker messages until the active job ends.
    pub async fn wait(&mut self, callbacks: &mut dyn InferenceCallbacks) -> Option<JobOutcome> {
        loop {
            let next = match self.active.as_mut().and_then(|job| job.worker.as_mut()) {
                Some(worker) => worker.next().await,
                None => return self.last_outcome.clone(),
            };
            if self.deliver(next, callbacks) {
                return self.last_outcome.clone();
            }
        }
    }

    /// Returns true when the message ended the job.
    fn deliver(
        &mut self,
        message: Option<WorkerMessage>,
        callbacks: &mut dyn InferenceCallbacks,
    ) -> bool {
        match message {
            Some(WorkerMessage::Ui(ui)) if !ui.is_fatal() => {
                if ui.progress == Progress::OutOfMemory {
                    log::warn!("Worker reported a memory issue; job continues");
                }
                callbacks.on_ui(ui);
                false
            }
            Some(terminal) => {
                self.finish(terminal, callbacks);
                true
            }
            None => {
                let fatal = UiMessage::fatal("Worker stopped without reporting a result");
                self.finish(WorkerMessage::Ui(fatal), callbacks);
                true
            }
        }
    }

    /// Tear down the worker and release the job slot before reporting the
    /// terminal message.
    fn finish(&mut self, terminal: WorkerMessage, callbacks: &mut dyn InferenceCallbacks) {
        let Some(job) = self.active.take() else {
            return;
        };
        if let Some(worker) = job.worker {
            worker.terminate();
        }
        self.state = JobState::Idle;
        let elapsed = job.started.elapsed().as_secs_f64();

        match terminal {
            WorkerMessage::Img(image) => {
                log::info!(
                    "Job {} ('{}') completed in {:.2}s",
                    job.id,
                    job.model_name,
                    elapsed
                );
                self.last_outcome = Some(JobOutcome::Completed);
                callbacks.on_image(image);
            }
            WorkerMessage::Ui(ui) => {
                log::error!(
                    "Job {} ('{}') failed after {:.2}s: {}",
                    job.id,
                    job.model_name,
                    elapsed,
                    ui.modal_message
                );
                self.last_outcome = Some(JobOutcome::Failed(ui.modal_message.clone()));
                callbacks.on_ui(ui);
            }
        }
    }
}
