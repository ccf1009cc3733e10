mod common;

use brainchop_rs::dispatcher::{ExecutionMode, JobOutcome, JobState};
use brainchop_rs::document::{JsonSceneWriter, SceneDocument};
use brainchop_rs::error::BrainchopError;
use brainchop_rs::multiview::{SliceType, ViewKind};
use brainchop_rs::notify::NotificationLevel;
use brainchop_rs::overlay::DrawEdit;
use brainchop_rs::volume::{DataType, CONFORMED_PERM_RAS, INTENT_LABEL};
use common::*;
use std::sync::{mpsc, Arc, Mutex};

#[test]
fn test_unconformed_volume_is_conformed_before_dispatch() {
    let backend = ThresholdBackend::new();
    let (mut session, notifier) = session(backend.clone(), false);
    session.load_volume(unconformed_volume());

    session.select_model(Some(0)).unwrap();

    let primary = session.scene().primary().unwrap();
    assert_eq!(primary.dims(), [256, 256, 256]);
    assert_eq!(primary.perm_ras(), CONFORMED_PERM_RAS);

    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].header.dims, vec![3, 256, 256, 256]);
    assert_eq!(seen[0].header.datatype_code, DataType::Uint8.code());

    assert!(notifier
        .messages(NotificationLevel::Info)
        .contains(&"Running segmentation with model: Tissue GWM".to_string()));
}

#[test]
fn test_in_process_job_adds_overlay() {
    let backend = ThresholdBackend::new();
    let (mut session, notifier) = session(backend, false);
    session.load_volume(conformed_volume());

    session.select_model(Some(0)).unwrap();

    assert_eq!(session.dispatcher().state(), JobState::Idle);
    assert_eq!(session.dispatcher().last_outcome(), Some(&JobOutcome::Completed));
    assert_eq!(session.scene().len(), 2);

    let overlay = session.scene().overlay().unwrap();
    assert_eq!(overlay.header().intent_code, INTENT_LABEL);
    assert_eq!(overlay.opacity, 0.5);
    assert_eq!(session.status(), "Done");
    assert!(notifier
        .messages(NotificationLevel::Success)
        .contains(&"Segmentation completed successfully!".to_string()));

    // the render target saw the overlay and was left in multiplanar mode
    let target = session.renderer().target();
    assert_eq!(target.volumes, 2);
    assert_eq!(target.slice_type, Some(SliceType::Multiplanar));
    assert!(session.renderer().surface(ViewKind::Render).frame().pixel(0, 0).is_some());
}

#[test]
fn test_missing_label_reaches_diagnostics() {
    let backend = ThresholdBackend::new();
    let (mut session, _notifier) = session(backend, false);
    session.load_volume(conformed_volume());
    session.select_model(Some(0)).unwrap();

    let overlay = session.scene().overlay().unwrap();
    let labels = &overlay.label_colormap.as_ref().unwrap().labels;
    assert_eq!(labels[0], format!("background   {} mm3", 256 * 256 * 256 - 16 * 16 * 16));
    assert_eq!(labels[1], "Grey Matter   Missing");
    assert_eq!(labels[2], "White Matter   4096 mm3");

    let report = session.diagnostics_report().unwrap();
    assert!(report.starts_with(":: Diagnostics can help resolve issues"));
    assert!(report.contains("Status: Failed to Predict Labels - Grey Matter\n"));
    assert!(report.contains("Model: Tissue GWM\n"));
}

#[test]
fn test_diagnostics_unavailable_before_any_job() {
    let (mut session, notifier) = session(ThresholdBackend::new(), false);
    assert!(session.diagnostics_report().is_none());
    assert_eq!(notifier.messages(NotificationLevel::Warning).len(), 1);
}

#[test]
fn test_new_segmentation_replaces_overlay() {
    let (mut session, _notifier) = session(ThresholdBackend::new(), false);
    session.load_volume(conformed_volume());

    session.select_model(Some(0)).unwrap();
    session.select_model(Some(1)).unwrap();

    assert_eq!(session.scene().len(), 2);
    let overlay = session.scene().overlay().unwrap();
    assert!(overlay.label_colormap.is_none());
    // "Fire" is not a known colormap
    assert_eq!(overlay.colormap, "actc");
}

#[test]
fn test_select_without_volume() {
    let (mut session, notifier) = session(ThresholdBackend::new(), false);
    let err = session.select_model(Some(0)).unwrap_err();
    assert!(matches!(err, BrainchopError::Validation(_)));
    assert_eq!(notifier.messages(NotificationLevel::Warning).len(), 1);
    assert_eq!(session.dispatcher().state(), JobState::Idle);
}

#[test]
fn test_worker_mode_without_runtime_reports_error() {
    let (mut session, notifier) = session(ThresholdBackend::new(), true);
    session.load_volume(conformed_volume());

    let err = session.select_model(Some(0)).unwrap_err();
    assert!(matches!(err, BrainchopError::FatalInference(_)));
    assert!(!session.dispatcher().is_busy());
    assert!(notifier.messages(NotificationLevel::Error)[0].contains("Failed to start worker"));
}

#[tokio::test]
async fn test_second_request_rejected_while_worker_runs() {
    let (reported_tx, reported_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let backend = Arc::new(GatedBackend {
        reported: Mutex::new(reported_tx),
        gate: Mutex::new(gate_rx),
    });
    let (mut session, notifier) = session(backend, true);
    session.load_volume(conformed_volume());

    let first = session.select_model(Some(0)).unwrap();
    reported_rx.recv().unwrap();

    let err = session.select_model(Some(1)).unwrap_err();
    match err {
        BrainchopError::Concurrency(id) => assert_eq!(id, first.to_string()),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.dispatcher().active_job(), Some(&first));
    assert!(notifier
        .messages(NotificationLevel::Warning)
        .contains(&"A segmentation is already in progress".to_string()));

    // out-of-memory is reported but does not end the job
    session.pump();
    assert!(session.memory_issue());
    assert_eq!(session.dispatcher().state(), JobState::Running);
    assert!(notifier
        .messages(NotificationLevel::Error)
        .contains(&"Memory issue detected. Try a different model or smaller image.".to_string()));

    gate_tx.send(()).unwrap();
    assert_eq!(session.wait().await, Some(JobOutcome::Completed));
    assert_eq!(session.dispatcher().state(), JobState::Idle);
    assert_eq!(session.scene().len(), 2);
    drop(gate_tx);
}

#[tokio::test]
async fn test_execution_mode_toggle_reruns_model() {
    let backend = ThresholdBackend::new();
    let (mut session, _notifier) = session(backend.clone(), false);
    session.load_volume(conformed_volume());
    session.select_model(Some(0)).unwrap();

    let rerun = session.set_execution_mode(ExecutionMode::Worker).unwrap();
    assert!(rerun.is_some());
    assert_eq!(session.dispatcher().active_mode(), Some(ExecutionMode::Worker));
    assert_eq!(session.wait().await, Some(JobOutcome::Completed));

    assert_eq!(backend.seen.lock().unwrap().len(), 2);
    assert_eq!(session.scene().len(), 2);
}

#[test]
fn test_execution_mode_toggle_without_selection() {
    let (mut session, _notifier) = session(ThresholdBackend::new(), true);
    session.load_volume(conformed_volume());
    assert!(session
        .set_execution_mode(ExecutionMode::InProcess)
        .unwrap()
        .is_none());
    assert_eq!(session.execution_mode(), ExecutionMode::InProcess);
}

#[test]
fn test_save_segmentation() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, notifier) = session(ThresholdBackend::new(), false);
    session.load_volume(conformed_volume());

    assert!(session.save_segmentation(dir.path()).is_err());
    assert_eq!(notifier.messages(NotificationLevel::Warning).len(), 1);

    session.select_model(Some(0)).unwrap();
    let path = session.save_segmentation(dir.path()).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("brainchop_segmentation_"));
    assert!(name.ends_with(".nii.gz"));

    let saved = brainchop_rs::nifti_io::read_volume(&path).unwrap();
    assert_eq!(saved.dims(), [256, 256, 256]);
    assert_eq!(saved.header().intent_code, INTENT_LABEL);
}

#[test]
fn test_overlay_slider_sets_opacity() {
    let (mut session, _notifier) = session(ThresholdBackend::new(), false);
    session.load_volume(conformed_volume());
    session.select_model(Some(0)).unwrap();

    session.set_overlay_slider(255);
    assert_eq!(session.scene().overlay().unwrap().opacity, 1.0);

    session.select_model(Some(0)).unwrap();
    assert_eq!(session.scene().overlay().unwrap().opacity, 1.0);
}

/// Mask covering the first `n` voxels of a conformed volume
fn drawing(n: usize) -> Vec<u8> {
    let mut mask = vec![0u8; 256 * 256 * 256];
    mask[..n].iter_mut().for_each(|v| *v = 1);
    mask
}

#[test]
fn test_drawing_appends_and_deletes() {
    let (mut session, notifier) = session(ThresholdBackend::new(), false);
    session.load_volume(conformed_volume());
    session.select_model(Some(0)).unwrap();
    let draws = session.renderer().target().draws;

    session.apply_drawing(&drawing(10), DrawEdit::Append).unwrap();
    let img = session.scene().overlay().unwrap().img();
    assert!(img[..10].iter().all(|&v| v == 1));
    assert_eq!(img[10], 0);
    assert!(session.renderer().target().draws > draws);

    // the bright cube was labeled 2; erase one voxel of it
    let centre = 128 + 256 * (128 + 256 * 128);
    let mut mask = vec![0u8; 256 * 256 * 256];
    mask[centre] = 1;
    mask[0] = 1;
    session.apply_drawing(&mask, DrawEdit::Delete).unwrap();
    let img = session.scene().overlay().unwrap().img();
    assert_eq!(img[centre], 0);
    assert_eq!(img[0], 0);
    assert_eq!(img[1], 1);

    let successes = notifier.messages(NotificationLevel::Success);
    assert!(successes.contains(&"Drawing added to segmentation".to_string()));
    assert!(successes.contains(&"Drawing removed from segmentation".to_string()));
}

#[test]
fn test_drawing_requires_segmentation() {
    let (mut session, notifier) = session(ThresholdBackend::new(), false);
    session.load_volume(conformed_volume());

    let err = session.apply_drawing(&drawing(10), DrawEdit::Append).unwrap_err();
    assert!(matches!(err, BrainchopError::Validation(_)));
    assert_eq!(
        notifier.messages(NotificationLevel::Error),
        vec!["No segmentation open. Use the Model dropdown to generate one first.".to_string()]
    );
    assert_eq!(session.scene().len(), 1);
}

#[test]
fn test_empty_drawing_warns() {
    let (mut session, notifier) = session(ThresholdBackend::new(), false);
    session.load_volume(conformed_volume());
    session.select_model(Some(0)).unwrap();
    let before = session.scene().overlay().unwrap().img().to_vec();

    assert!(session.apply_drawing(&[], DrawEdit::Append).is_err());
    assert!(notifier
        .messages(NotificationLevel::Warning)
        .contains(&"No drawing. Select a drawing mode from the Draw dropdown first.".to_string()));

    // wrong size is rejected without touching the overlay
    assert!(session.apply_drawing(&[1, 1, 1], DrawEdit::Append).is_err());
    assert_eq!(session.scene().overlay().unwrap().img(), before.as_slice());
}

#[test]
fn test_save_scene() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, notifier) = session(ThresholdBackend::new(), false);

    assert!(session.save_scene(&JsonSceneWriter, dir.path()).is_err());
    assert_eq!(
        notifier.messages(NotificationLevel::Warning),
        vec!["No scene to save. Load an image first.".to_string()]
    );

    session.load_volume(conformed_volume());
    session.select_model(Some(0)).unwrap();
    let path = session.save_scene(&JsonSceneWriter, dir.path()).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("brainchop_scene_"));
    assert!(name.ends_with(".nvd"));

    let document: SceneDocument =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(document.volumes.len(), 2);
    assert_eq!(document.volumes[1].labels[1], "Grey Matter   Missing");
    assert!(notifier
        .messages(NotificationLevel::Success)
        .contains(&format!("Scene saved as {}", name)));
}
