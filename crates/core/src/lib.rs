//! Core library for the reactive media compositor.
//!
//! Audio energy from a live spectrum drives a beat detector, which in turn
//! advances a catalog of videos and images and modulates a colour and
//! distortion pipeline rendered to a full-surface quad. Each module owns one
//! subsystem; hosts plug in the surface, decoder and capture devices through
//! the capability traits and own the session through [`CompositorContext`].

pub mod analysis;
pub mod audio;
pub mod beat;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod input;
pub mod media;
pub mod render;
pub mod scheduler;
pub mod shading;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use analysis::SpectrumAnalyser;
pub use audio::{
    CaptureKind, CaptureStream, MediaCapture, Spectrum, SpectrumOrigin, SpectrumSampler,
    SpectrumSource,
};
pub use beat::{BeatDetector, BeatReading, BeatState};
pub use catalog::{MediaCatalog, MediaDescriptor, MediaKind, UrlReleaser};
pub use config::{
    AnalyserConfig, AppConfig, BeatConfig, ContrastProfile, DisplayConfig, EffectConfig,
    GradeProfile, PipelineConfig, Preset, SecondarySource, SplitSide,
};
pub use context::{CompositorContext, GraphicsStatus};
pub use error::{CaptureError, CompositorError, Result};
pub use input::{dispatch, InputEvent, InputOutcome};
pub use media::{
    DecodedFrame, LoadTicket, MediaDecoder, MediaEvent, MediaPipeline, MediaSize, SlotState,
    VideoFeed,
};
pub use render::{GpuResources, GraphicsSurface, UniformValue};
pub use scheduler::{FrameClock, FrameScheduler, FrameStats, TickOutcome};
pub use shading::{aspect_fit, ShaderParams, ShaderStage};
pub use state::{CompositorState, DisplayMode, PointerState, StatePatch, Store};
