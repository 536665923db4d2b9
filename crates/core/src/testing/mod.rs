//! In-memory stand-ins for the host capabilities.
//!
//! Compiled for the crate's own tests and for dependents that enable the
//! `testing` feature. Nothing here touches a GPU, a decoder or a device.

use std::{collections::VecDeque, fmt};

use glam::Vec2;

use crate::{
    audio::{CaptureKind, CaptureStream, MediaCapture, Spectrum, SpectrumSource},
    error::CaptureError,
    media::{DecodedFrame, LoadRequest, LoadTicket, MediaDecoder, MediaEvent, MediaSize},
    render::{GraphicsSurface, ProgramHandle, TextureHandle, UniformValue},
    CompositorError, Result,
};

/// Decoder stand-in driven entirely by the caller: loads are recorded and
/// completions are queued by hand.
#[derive(Debug, Default)]
pub struct ManualDecoder {
    pub requests: Vec<(String, LoadTicket, bool)>,
    events: VecDeque<MediaEvent>,
    frames: VecDeque<DecodedFrame>,
    auto_size: Option<MediaSize>,
}

impl ManualDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that completes every load at once with a `size` frame.
    pub fn auto_complete(size: MediaSize) -> Self {
        Self {
            auto_size: Some(size),
            ..Self::default()
        }
    }

    pub fn last_ticket(&self) -> Option<LoadTicket> {
        self.requests.last().map(|(_, ticket, _)| *ticket)
    }

    pub fn push_event(&mut self, event: MediaEvent) {
        self.events.push_back(event);
    }

    pub fn push_frame(&mut self, frame: DecodedFrame) {
        self.frames.push_back(frame);
    }
}

impl MediaDecoder for ManualDecoder {
    fn begin_load(&mut self, request: LoadRequest<'_>) {
        self.requests.push((
            request.descriptor.url().to_string(),
            request.ticket,
            request.looping,
        ));
        if let Some(size) = self.auto_size {
            self.events.push_back(MediaEvent::Loaded {
                ticket: request.ticket,
                size,
            });
            self.frames.push_back(DecodedFrame::solid(size, [128, 128, 128, 255]));
        }
    }

    fn poll_event(&mut self) -> Option<MediaEvent> {
        self.events.pop_front()
    }

    fn next_frame(&mut self) -> Option<DecodedFrame> {
        self.frames.pop_front()
    }
}

/// One call made against a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    CreateProgram,
    CreateTexture(u32),
    SetUniform(String, UniformValue),
    Upload(TextureHandle, MediaSize),
    Draw(u32),
}

/// Surface that records every call instead of touching a GPU.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    pub size: Vec2,
    pub calls: Vec<SurfaceCall>,
    /// Makes `create_program` fail, as a link error would.
    pub fail_link: bool,
    next_handle: u32,
}

impl RecordingSurface {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            size: Vec2::new(width, height),
            calls: Vec::new(),
            fail_link: false,
            next_handle: 1,
        }
    }

    /// Most recent value written to `name`.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.calls.iter().rev().find_map(|call| match call {
            SurfaceCall::SetUniform(n, value) if n == name => Some(*value),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, SurfaceCall::Draw(_)))
            .count()
    }

    pub fn uploads(&self) -> Vec<TextureHandle> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Upload(texture, _) => Some(*texture),
                _ => None,
            })
            .collect()
    }

    fn handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl GraphicsSurface for RecordingSurface {
    fn size(&self) -> Vec2 {
        self.size
    }

    fn create_program(&mut self, _vertex: &str, _fragment: &str) -> Result<ProgramHandle> {
        self.calls.push(SurfaceCall::CreateProgram);
        if self.fail_link {
            return Err(CompositorError::msg("program failed to link"));
        }
        Ok(ProgramHandle(self.handle()))
    }

    fn create_texture(&mut self, unit: u32) -> Result<TextureHandle> {
        self.calls.push(SurfaceCall::CreateTexture(unit));
        Ok(TextureHandle(self.handle()))
    }

    fn set_uniform(&mut self, _program: ProgramHandle, name: &str, value: UniformValue) {
        self.calls.push(SurfaceCall::SetUniform(name.to_string(), value));
    }

    fn upload_image(&mut self, texture: TextureHandle, frame: &DecodedFrame) -> Result<()> {
        self.calls.push(SurfaceCall::Upload(texture, frame.size));
        Ok(())
    }

    fn draw(&mut self, _program: ProgramHandle, vertex_count: u32) -> Result<()> {
        self.calls.push(SurfaceCall::Draw(vertex_count));
        Ok(())
    }
}

/// Source that replays a fixed list of snapshots, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedSpectrum {
    frames: Vec<Spectrum>,
    cursor: usize,
    connected: bool,
}

impl ScriptedSpectrum {
    pub fn new(frames: Vec<Spectrum>) -> Self {
        Self {
            frames,
            cursor: 0,
            connected: true,
        }
    }
}

impl SpectrumSource for ScriptedSpectrum {
    fn bin_count(&self) -> usize {
        self.frames.first().map(Spectrum::len).unwrap_or(0)
    }

    fn snapshot(&mut self) -> Option<Spectrum> {
        if !self.connected || self.frames.is_empty() {
            return None;
        }
        let index = self.cursor.min(self.frames.len() - 1);
        self.cursor += 1;
        Some(self.frames[index].clone())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Capture stand-in that answers every request with a prepared outcome.
pub struct ScriptedCapture {
    outcome: Option<std::result::Result<CaptureStream, CaptureError>>,
    pub requests: Vec<CaptureKind>,
}

impl ScriptedCapture {
    pub fn granting(stream: CaptureStream) -> Self {
        Self {
            outcome: Some(Ok(stream)),
            requests: Vec::new(),
        }
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            outcome: Some(Err(error)),
            requests: Vec::new(),
        }
    }
}

impl MediaCapture for ScriptedCapture {
    fn acquire(&mut self, kind: CaptureKind) -> std::result::Result<CaptureStream, CaptureError> {
        self.requests.push(kind);
        self.outcome
            .take()
            .unwrap_or_else(|| Err(CaptureError::Unavailable("capture already consumed".into())))
    }
}

impl fmt::Debug for ScriptedCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedCapture")
            .field("pending", &self.outcome.is_some())
            .field("requests", &self.requests)
            .finish()
    }
}
