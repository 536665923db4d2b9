//! User input dispatch. Handlers never fail outward: anything that goes
//! wrong is logged and the frame loop carries on.

use std::time::Duration;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    catalog::{MediaDescriptor, MediaKind},
    context::CompositorContext,
    render::GraphicsSurface,
    state::{DisplayMode, StatePatch},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Other,
}

/// The two numeric drag bars: temperature drives `pointer.x`, contrast
/// drives `pointer.y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBar {
    Temperature,
    Contrast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    pub url: String,
    pub mime: String,
}

impl SelectedFile {
    pub fn new(url: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime: mime.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Pointer position in surface pixels, origin top-left.
    PointerMoved { x: f32, y: f32 },
    Touch { x: f32, y: f32 },
    Click,
    DoubleClick,
    Key { key: Key },
    DragBar { bar: ControlBar, percent: f32 },
    FilesSelected { files: Vec<SelectedFile> },
    Resized { width: f32, height: f32 },
    SetDisplayMode { mode: DisplayMode },
    SetDivider { percent: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Handled,
    Ignored(&'static str),
}

/// Applies one input event to the session at `now`.
pub fn dispatch(
    ctx: &mut CompositorContext,
    surface: &mut dyn GraphicsSurface,
    event: InputEvent,
    now: Duration,
) -> InputOutcome {
    match event {
        InputEvent::PointerMoved { x, y } | InputEvent::Touch { x, y } => {
            let state = ctx.state();
            let pointer = state.pointer.moved_to(Vec2::new(x, y), state.resolution, now);
            ctx.update(StatePatch::pointer(pointer));
            InputOutcome::Handled
        }
        InputEvent::Click => {
            let old_film = !ctx.state().old_film;
            ctx.update(StatePatch {
                old_film: Some(old_film),
                ..StatePatch::default()
            });
            debug!(old_film, "old film toggled");
            InputOutcome::Handled
        }
        InputEvent::DoubleClick => step_media(ctx, true),
        InputEvent::Key { key } => {
            if ctx.state().capture_active {
                return InputOutcome::Ignored("media controls locked during capture");
            }
            match key {
                Key::ArrowRight | Key::ArrowDown => step_media(ctx, true),
                Key::ArrowLeft | Key::ArrowUp => step_media(ctx, false),
                Key::Other => InputOutcome::Ignored("unbound key"),
            }
        }
        InputEvent::DragBar { bar, percent } => {
            if ctx.state().capture_active {
                return InputOutcome::Ignored("media controls locked during capture");
            }
            if !percent.is_finite() {
                return InputOutcome::Ignored("non-finite drag value");
            }
            let value = (percent / 100.0).clamp(0.0, 1.0);
            let current = ctx.state().pointer;
            let pointer = match bar {
                ControlBar::Temperature => current.with_position(Some(value), None),
                ControlBar::Contrast => current.with_position(None, Some(value)),
            };
            ctx.update(StatePatch::pointer(pointer));
            InputOutcome::Handled
        }
        InputEvent::FilesSelected { files } => select_files(ctx, files),
        InputEvent::Resized { width, height } => {
            if !(width.is_finite() && height.is_finite()) || width < 0.0 || height < 0.0 {
                return InputOutcome::Ignored("invalid surface size");
            }
            ctx.resize(surface, width, height);
            InputOutcome::Handled
        }
        InputEvent::SetDisplayMode { mode } => {
            ctx.update(StatePatch::display_mode(mode));
            info!(?mode, "display mode changed");
            InputOutcome::Handled
        }
        InputEvent::SetDivider { percent } => {
            ctx.update(StatePatch::divider(percent));
            InputOutcome::Handled
        }
    }
}

fn step_media(ctx: &mut CompositorContext, forward: bool) -> InputOutcome {
    let result = if forward { ctx.advance() } else { ctx.retreat() };
    match result {
        Ok(_) => InputOutcome::Handled,
        Err(err) => {
            warn!(%err, forward, "manual media change failed");
            InputOutcome::Ignored("no media to switch to")
        }
    }
}

fn select_files(ctx: &mut CompositorContext, files: Vec<SelectedFile>) -> InputOutcome {
    let mut accepted = Vec::with_capacity(files.len());
    for file in files {
        match MediaKind::from_mime(&file.mime) {
            Some(kind) => accepted.push(MediaDescriptor::new(file.url, kind)),
            None => {
                warn!(url = %file.url, mime = %file.mime, "skipping unsupported file");
                ctx.release_url(&file.url);
            }
        }
    }

    if accepted.is_empty() {
        warn!("no supported files selected; keeping current media");
        return InputOutcome::Ignored("no supported files");
    }
    match ctx.replace_catalog(accepted) {
        Ok(_) => InputOutcome::Handled,
        Err(err) => {
            warn!(%err, "could not load selected files");
            InputOutcome::Ignored("selected files failed to load")
        }
    }
}
