//! Four-view rendering on top of a single-view render target.
//!
//! The primary target draws one slice type at a time. [`MultiViewRenderer`]
//! wraps it and, after every primary draw, re-renders the target once per
//! [`ViewKind`] and copies each capture into that view's [`ViewSurface`].
//! Afterwards the target is put back into multiplanar mode so interaction
//! on it keeps working.

use crate::overlay::DEFAULT_COLORMAPS;
use crate::scene::Scene;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Axial,
    Sagittal,
    Coronal,
    Render,
}

impl ViewKind {
    /// Capture order
    pub const ALL: [ViewKind; 4] = [
        ViewKind::Axial,
        ViewKind::Sagittal,
        ViewKind::Coronal,
        ViewKind::Render,
    ];

    pub fn slice_type(self) -> SliceType {
        match self {
            ViewKind::Axial => SliceType::Axial,
            ViewKind::Sagittal => SliceType::Sagittal,
            ViewKind::Coronal => SliceType::Coronal,
            ViewKind::Render => SliceType::Render,
        }
    }

    fn index(self) -> usize {
        match self {
            ViewKind::Axial => 0,
            ViewKind::Sagittal => 1,
            ViewKind::Coronal => 2,
            ViewKind::Render => 3,
        }
    }
}

impl std::fmt::Display for ViewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewKind::Axial => write!(f, "axial"),
            ViewKind::Sagittal => write!(f, "sagittal"),
            ViewKind::Coronal => write!(f, "coronal"),
            ViewKind::Render => write!(f, "render"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    Axial,
    Coronal,
    Sagittal,
    Multiplanar,
    Render,
}

/// Arrangement of the panes in multiplanar mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplanarLayout {
    Auto,
    Column,
    Grid,
    Row,
}

impl MultiplanarLayout {
    pub fn code(self) -> u8 {
        match self {
            MultiplanarLayout::Auto => 0,
            MultiplanarLayout::Column => 1,
            MultiplanarLayout::Grid => 2,
            MultiplanarLayout::Row => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrosshairSettings {
    pub show_3d: bool,
    pub width: f32,
}

impl Default for CrosshairSettings {
    fn default() -> Self {
        Self {
            show_3d: false,
            width: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Per-axis maximum
    pub fn max(self, other: Size) -> Size {
        Size::new(self.width.max(other.width), self.height.max(other.height))
    }
}

/// RGBA8 pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    size: Size,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            pixels: vec![0; size.pixel_count() * 4],
        }
    }

    pub fn filled(size: Size, rgba: [u8; 4]) -> Self {
        let mut frame = Self::new(size);
        for px in frame.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        frame
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let offset = (y as usize * self.size.width as usize + x as usize) * 4;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[offset..offset + 4]);
        Some(px)
    }
}

/// Display-only surface showing one view. Holds no renderer state.
#[derive(Debug, Clone)]
pub struct ViewSurface {
    kind: ViewKind,
    frame: Frame,
}

impl ViewSurface {
    pub fn new(kind: ViewKind, size: Size) -> Self {
        Self {
            kind,
            frame: Frame::new(size),
        }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn size(&self) -> Size {
        self.frame.size
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn resize(&mut self, size: Size) {
        if size != self.frame.size {
            self.frame = Frame::new(size);
        }
    }

    pub fn clear(&mut self) {
        self.frame.pixels.iter_mut().for_each(|b| *b = 0);
    }

    /// Copy `src` scaled to fill the whole surface (nearest neighbour).
    pub fn blit_scaled(&mut self, src: &Frame) {
        let (sw, sh) = (src.size.width as usize, src.size.height as usize);
        let (dw, dh) = (self.frame.size.width as usize, self.frame.size.height as usize);
        if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
            return;
        }

        for dy in 0..dh {
            let sy = dy * sh / dh;
            for dx in 0..dw {
                let sx = dx * sw / dw;
                let s = (sy * sw + sx) * 4;
                let d = (dy * dw + dx) * 4;
                self.frame.pixels[d..d + 4].copy_from_slice(&src.pixels[s..s + 4]);
            }
        }
    }
}

/// The engine the viewer draws with
pub trait RenderTarget {
    /// Take over the current volume list before the next draw.
    fn update_scene(&mut self, scene: &Scene);
    fn draw_scene(&mut self);
    fn set_slice_type(&mut self, slice_type: SliceType);
    fn set_multiplanar_layout(&mut self, layout: MultiplanarLayout);
    fn crosshair(&self) -> CrosshairSettings;
    fn set_crosshair(&mut self, settings: CrosshairSettings);
    /// Last drawn image
    fn frame(&self) -> &Frame;
    fn size(&self) -> Size;
    fn resize(&mut self, size: Size);
    fn volume_count(&self) -> usize;

    fn colormaps(&self) -> Vec<String> {
        DEFAULT_COLORMAPS.iter().map(|s| s.to_string()).collect()
    }
}

pub trait SceneRenderer {
    fn redraw(&mut self);
}

/// Wraps a render target so that every redraw also refreshes the four view surfaces
pub struct MultiViewRenderer<T: RenderTarget> {
    target: T,
    surfaces: [ViewSurface; 4],
}

impl<T: RenderTarget> MultiViewRenderer<T> {
    /// `sizes` are the container sizes of the views, in [`ViewKind::ALL`] order.
    pub fn new(target: T, sizes: [Size; 4]) -> Self {
        let surfaces = [
            ViewSurface::new(ViewKind::Axial, sizes[0]),
            ViewSurface::new(ViewKind::Sagittal, sizes[1]),
            ViewSurface::new(ViewKind::Coronal, sizes[2]),
            ViewSurface::new(ViewKind::Render, sizes[3]),
        ];
        let mut renderer = Self { target, surfaces };
        renderer.fit_target();
        renderer
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn surface(&self, kind: ViewKind) -> &ViewSurface {
        &self.surfaces[kind.index()]
    }

    pub fn surfaces(&self) -> &[ViewSurface; 4] {
        &self.surfaces
    }

    /// Resize each view to its container and the shared target to the
    /// per-axis maximum, then redraw.
    pub fn resize(&mut self, sizes: [Size; 4]) {
        for (surface, size) in self.surfaces.iter_mut().zip(sizes) {
            surface.resize(size);
        }
        self.fit_target();
        self.redraw();
    }

    fn fit_target(&mut self) {
        let shared = self
            .surfaces
            .iter()
            .fold(Size::default(), |acc, s| acc.max(s.size()));
        if shared != self.target.size() {
            log::debug!("Resizing render target to {}x{}", shared.width, shared.height);
            self.target.resize(shared);
        }
    }

    /// Render every view into its surface. Returns false when there is
    /// nothing to show.
    pub fn multiplex(&mut self) -> bool {
        if self.target.volume_count() == 0 {
            return false;
        }

        let saved = self.target.crosshair();

        for kind in ViewKind::ALL {
            match kind {
                ViewKind::Axial => {
                    self.target.set_crosshair(CrosshairSettings {
                        show_3d: true,
                        width: 1.0,
                    });
                    self.target.set_slice_type(SliceType::Axial);
                    self.target.set_multiplanar_layout(MultiplanarLayout::Auto);
                }
                ViewKind::Render => {
                    let current = self.target.crosshair();
                    self.target.set_crosshair(CrosshairSettings {
                        show_3d: false,
                        ..current
                    });
                    self.target.set_slice_type(SliceType::Render);
                }
                other => self.target.set_slice_type(other.slice_type()),
            }

            self.target.draw_scene();

            let surface = &mut self.surfaces[kind.index()];
            surface.clear();
            surface.blit_scaled(self.target.frame());
        }

        self.target.set_crosshair(saved);
        self.target.set_slice_type(SliceType::Multiplanar);
        self.target.set_multiplanar_layout(MultiplanarLayout::Column);
        true
    }
}

impl<T: RenderTarget> SceneRenderer for MultiViewRenderer<T> {
    fn redraw(&mut self) {
        self.target.draw_scene();
        self.multiplex();
    }
}
