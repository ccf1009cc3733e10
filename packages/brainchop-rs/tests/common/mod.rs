#![allow(dead_code)]

use brainchop_rs::catalog::{InferenceOptions, ModelCatalog, ModelDescriptor};
use brainchop_rs::config::SessionConfig;
use brainchop_rs::dispatcher::{InferenceBackend, JobContext};
use brainchop_rs::error::{BrainchopError, Result};
use brainchop_rs::multiview::{
    CrosshairSettings, Frame, MultiplanarLayout, RenderTarget, SliceType, Size,
};
use brainchop_rs::notify::RecordingNotifier;
use brainchop_rs::palette::{LabelPalette, PaletteSource};
use brainchop_rs::protocol::JobRequest;
use brainchop_rs::scene::Scene;
use brainchop_rs::session::Session;
use brainchop_rs::volume::{DataType, Volume, VolumeHeader};
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};

pub const LIA: [[f64; 4]; 3] = [
    [-1.0, 0.0, 0.0, 128.0],
    [0.0, 0.0, 1.0, -128.0],
    [0.0, -1.0, 0.0, 128.0],
];

/// 256³ LIA volume, zero except for a bright cube in the middle
pub fn conformed_volume() -> Volume {
    let header = VolumeHeader::new([256, 256, 256], DataType::Uint8).with_affine(LIA);
    let mut img = vec![0u8; header.byte_len()];
    for k in 120..136 {
        for j in 120..136 {
            for i in 120..136 {
                img[i + 256 * (j + 256 * k)] = 200;
            }
        }
    }
    Volume::new("t1.nii", header, img).unwrap()
}

/// Identity-oriented int16 volume as read from a typical scanner export
pub fn unconformed_volume() -> Volume {
    let header = VolumeHeader::new([180, 256, 180], DataType::Int16);
    let mut img = vec![0u8; header.byte_len()];
    for k in 80..100 {
        for j in 120..140 {
            for i in 80..100 {
                let offset = (i + 180 * (j + 256 * k)) * 2;
                img[offset..offset + 2].copy_from_slice(&900i16.to_le_bytes());
            }
        }
    }
    Volume::new("raw.nii", header, img).unwrap()
}

pub struct FakeTarget {
    pub volumes: usize,
    pub draws: usize,
    pub slice_type: Option<SliceType>,
    pub size: Size,
    pub crosshair: CrosshairSettings,
    frame: Frame,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self {
            volumes: 0,
            draws: 0,
            slice_type: None,
            size: Size::default(),
            crosshair: CrosshairSettings::default(),
            frame: Frame::new(Size::default()),
        }
    }
}

impl RenderTarget for FakeTarget {
    fn update_scene(&mut self, scene: &Scene) {
        self.volumes = scene.len();
    }
    fn draw_scene(&mut self) {
        self.draws += 1;
        self.frame = Frame::filled(self.size, [self.draws as u8, 0, 0, 255]);
    }
    fn set_slice_type(&mut self, slice_type: SliceType) {
        self.slice_type = Some(slice_type);
    }
    fn set_multiplanar_layout(&mut self, _layout: MultiplanarLayout) {}
    fn crosshair(&self) -> CrosshairSettings {
        self.crosshair
    }
    fn set_crosshair(&mut self, settings: CrosshairSettings) {
        self.crosshair = settings;
    }
    fn frame(&self) -> &Frame {
        &self.frame
    }
    fn size(&self) -> Size {
        self.size
    }
    fn resize(&mut self, size: Size) {
        self.size = size;
    }
    fn volume_count(&self) -> usize {
        self.volumes
    }
}

pub struct MapPalettes(pub HashMap<String, LabelPalette>);

impl PaletteSource for MapPalettes {
    fn load(&self, locator: &str) -> Result<LabelPalette> {
        self.0
            .get(locator)
            .cloned()
            .ok_or_else(|| BrainchopError::Palette(format!("{} not found", locator)))
    }
}

pub fn palettes() -> MapPalettes {
    let mut map = HashMap::new();
    map.insert(
        "./models/gwm/colormap3.json".to_string(),
        LabelPalette {
            r: vec![0, 255, 255],
            g: vec![0, 255, 0],
            b: vec![0, 255, 0],
            labels: vec![
                "background".to_string(),
                "Grey Matter".to_string(),
                "White Matter".to_string(),
            ],
        },
    );
    MapPalettes(map)
}

pub fn catalog() -> ModelCatalog {
    ModelCatalog::new(vec![
        ModelDescriptor::new(1, "Tissue GWM").with_colormap("./models/gwm/colormap3.json"),
        ModelDescriptor::new(2, "Extract the brain"),
    ])
}

/// Labels bright voxels as white matter, everything else as background.
/// Never produces grey matter.
pub struct ThresholdBackend {
    pub seen: Mutex<Vec<JobRequest>>,
}

impl ThresholdBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl InferenceBackend for ThresholdBackend {
    fn infer(
        &self,
        request: &JobRequest,
        ctx: &mut JobContext<'_>,
    ) -> std::result::Result<Vec<u8>, String> {
        ctx.progress("Loading model", 0.1);
        let labels = request
            .image
            .iter()
            .map(|&v| if v > 0 { 2 } else { 0 })
            .collect();
        ctx.telemetry(serde_json::json!({
            "Model": request.model.model_name,
            "Status": "OK",
        }));
        ctx.progress("Done", 1.0);
        let mut stripped = request.clone();
        stripped.image.clear();
        self.seen.lock().unwrap().push(stripped);
        Ok(labels)
    }
}

/// Reports out-of-memory, then holds until the gate opens
pub struct GatedBackend {
    pub reported: Mutex<mpsc::Sender<()>>,
    pub gate: Mutex<mpsc::Receiver<()>>,
}

impl InferenceBackend for GatedBackend {
    fn infer(
        &self,
        request: &JobRequest,
        ctx: &mut JobContext<'_>,
    ) -> std::result::Result<Vec<u8>, String> {
        ctx.out_of_memory("texture allocation failed, retrying smaller batches");
        let _ = self.reported.lock().unwrap().send(());
        let _ = self.gate.lock().unwrap().recv();
        Ok(vec![0; request.image.len()])
    }
}

pub fn view_sizes() -> [Size; 4] {
    [
        Size::new(64, 64),
        Size::new(64, 64),
        Size::new(64, 64),
        Size::new(64, 64),
    ]
}

pub fn session(
    backend: Arc<dyn InferenceBackend>,
    use_worker: bool,
) -> (Session<FakeTarget, MapPalettes, RecordingNotifier>, RecordingNotifier) {
    let notifier = RecordingNotifier::new();
    let config = SessionConfig {
        use_worker,
        ..SessionConfig::default()
    };
    let session = Session::new(
        backend,
        FakeTarget::new(),
        view_sizes(),
        palettes(),
        notifier.clone(),
        catalog(),
        InferenceOptions::default(),
        &config,
    );
    (session, notifier)
}
