//! Pointer and wheel events captured on a view surface, re-targeted at the
//! one interactive render surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    MouseDown,
    MouseUp,
    MouseMove,
    Wheel,
    Click,
    DblClick,
    ContextMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WheelDelta {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// 0 pixels, 1 lines, 2 pages
    pub mode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: InputKind,
    pub client_x: f64,
    pub client_y: f64,
    pub screen_x: f64,
    pub screen_y: f64,
    pub button: i16,
    pub buttons: u16,
    pub modifiers: Modifiers,
    pub detail: i32,
    pub wheel: WheelDelta,
}

impl InputEvent {
    pub fn new(kind: InputKind, client_x: f64, client_y: f64) -> Self {
        Self {
            kind,
            client_x,
            client_y,
            screen_x: client_x,
            screen_y: client_y,
            button: 0,
            buttons: 0,
            modifiers: Modifiers::default(),
            detail: 0,
            wheel: WheelDelta::default(),
        }
    }
}

/// Client-space bounds of a surface
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.left + self.width && y >= self.top && y < self.top + self.height
    }
}

fn scale_axis(value: f64, src_origin: f64, src_extent: f64, dest_origin: f64, dest_extent: f64) -> f64 {
    if src_extent <= 0.0 {
        return dest_origin;
    }
    dest_origin + (value - src_origin) / src_extent * dest_extent
}

/// Re-express `event`'s client position relative to `dest` instead of `src`.
/// Everything except the client position is carried over unchanged.
pub fn remap(event: &InputEvent, src: Rect, dest: Rect) -> InputEvent {
    InputEvent {
        client_x: scale_axis(event.client_x, src.left, src.width, dest.left, dest.width),
        client_y: scale_axis(event.client_y, src.top, src.height, dest.top, dest.height),
        ..*event
    }
}

/// The surface that actually reacts to input
pub trait InteractiveSurface {
    fn bounds(&self) -> Rect;
    fn dispatch(&mut self, event: InputEvent);
}

/// Result of forwarding one event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forwarded {
    pub event: InputEvent,
    /// The surface the event came from must not run its own default handling
    pub prevent_default: bool,
}

pub struct InputProxy<S: InteractiveSurface> {
    target: S,
}

impl<S: InteractiveSurface> InputProxy<S> {
    pub fn new(target: S) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &S {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut S {
        &mut self.target
    }

    pub fn forward(&mut self, event: &InputEvent, source: Rect) -> Forwarded {
        let remapped = remap(event, source, self.target.bounds());
        log::trace!(
            "{:?} ({:.1}, {:.1}) -> ({:.1}, {:.1})",
            event.kind,
            event.client_x,
            event.client_y,
            remapped.client_x,
            remapped.client_y
        );
        self.target.dispatch(remapped);
        Forwarded {
            event: remapped,
            prevent_default: true,
        }
    }
}
