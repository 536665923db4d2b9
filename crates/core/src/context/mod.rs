//! Session context owned by the entry point. Everything the frame loop and
//! the input handlers touch lives here and is passed around by reference.

use std::{fmt, time::Duration};

use glam::Vec2;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{CaptureKind, CaptureStream, MediaCapture, SpectrumOrigin, SpectrumSampler},
    beat::{BeatDetector, BeatReading},
    catalog::{MediaCatalog, MediaDescriptor, NoopReleaser, UrlReleaser},
    config::SecondarySource,
    error::CaptureError,
    media::{DecodedFrame, LoadTicket, MediaDecoder, MediaPipeline, PipelineNotice, VideoFeed},
    render::{GpuResources, GraphicsSurface},
    shading::ShaderParams,
    state::{CompositorState, Deferred, StatePatch, Store, SubscriptionId},
    AppConfig, CompositorError, Result,
};

/// Lifecycle of the GPU side of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphicsStatus {
    #[default]
    Uninitialized,
    Ready(GpuResources),
    /// Initialization failed; the frame loop stays stopped.
    Failed,
}

pub struct CompositorContext {
    config: AppConfig,
    store: Store,
    catalog: MediaCatalog,
    pipeline: MediaPipeline,
    sampler: SpectrumSampler,
    detector: BeatDetector,
    decoder: Box<dyn MediaDecoder>,
    releaser: Box<dyn UrlReleaser>,
    secondary: Option<(CaptureKind, Box<dyn VideoFeed>)>,
    graphics: GraphicsStatus,
}

impl CompositorContext {
    pub fn new(config: AppConfig, decoder: Box<dyn MediaDecoder>) -> Result<Self> {
        config.validate()?;

        let initial = CompositorState {
            display_mode: config.display.mode,
            divider_position: config.display.divider_position,
            ..CompositorState::default()
        };

        Ok(Self {
            store: Store::new(initial),
            catalog: MediaCatalog::new(config.media.clone()),
            pipeline: MediaPipeline::new(config.pipeline.video_looping),
            sampler: SpectrumSampler::new(),
            detector: BeatDetector::new(config.beat.clone()),
            decoder,
            releaser: Box::new(NoopReleaser),
            secondary: None,
            graphics: GraphicsStatus::Uninitialized,
            config,
        })
    }

    pub fn with_releaser(mut self, releaser: Box<dyn UrlReleaser>) -> Self {
        self.releaser = releaser;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &CompositorState {
        self.store.state()
    }

    pub fn catalog(&self) -> &MediaCatalog {
        &self.catalog
    }

    pub fn pipeline(&self) -> &MediaPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut MediaPipeline {
        &mut self.pipeline
    }

    pub fn sampler(&self) -> &SpectrumSampler {
        &self.sampler
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn graphics(&self) -> GraphicsStatus {
        self.graphics
    }

    pub fn subscribe(
        &mut self,
        subscriber: impl FnMut(&CompositorState, &mut Deferred) + 'static,
    ) -> SubscriptionId {
        self.store.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Merges a patch into the shared state. Returns the notify passes run.
    pub fn update(&mut self, patch: StatePatch) -> usize {
        self.store.update(patch)
    }

    /// Loads the first catalog entry and routes its audio to the analyser.
    pub fn start(&mut self) -> Result<LoadTicket> {
        let ticket = self.load(0)?;
        self.connect_media_audio();
        Ok(ticket)
    }

    pub fn initialize_graphics(&mut self, surface: &mut dyn GraphicsSurface) -> Result<()> {
        match GpuResources::create(surface, &self.config) {
            Ok(resources) => {
                self.graphics = GraphicsStatus::Ready(resources);
                let size = surface.size();
                self.resize(surface, size.x, size.y);
                info!(width = size.x, height = size.y, "graphics initialized");
                Ok(())
            }
            Err(err) => {
                error!(%err, "visual pipeline disabled");
                self.graphics = GraphicsStatus::Failed;
                Err(err)
            }
        }
    }

    /// Records the new drawable size and rewrites the fit uniforms right
    /// away instead of waiting for the next tick.
    pub fn resize(&mut self, surface: &mut dyn GraphicsSurface, width: f32, height: f32) {
        self.store.update(StatePatch::resolution(Vec2::new(width, height)));
        if let GraphicsStatus::Ready(resources) = self.graphics {
            let params = ShaderParams::from_state(self.store.state(), &self.config, 0.0);
            resources.write_fit_uniforms(surface, &params);
        }
    }

    pub fn load(&mut self, index: usize) -> Result<LoadTicket> {
        let ticket = self
            .pipeline
            .load(index, &self.catalog, self.decoder.as_mut())?;
        self.publish_media();
        Ok(ticket)
    }

    pub fn advance(&mut self) -> Result<LoadTicket> {
        let ticket = self
            .pipeline
            .swap_to_next(&self.catalog, self.decoder.as_mut())?;
        self.publish_media();
        Ok(ticket)
    }

    pub fn retreat(&mut self) -> Result<LoadTicket> {
        let ticket = self
            .pipeline
            .swap_to_previous(&self.catalog, self.decoder.as_mut())?;
        self.publish_media();
        Ok(ticket)
    }

    /// Swaps in user-provided sources and starts the first of them.
    pub fn replace_catalog(&mut self, entries: Vec<MediaDescriptor>) -> Result<LoadTicket> {
        if entries.is_empty() {
            return Err(CompositorError::EmptyCatalog);
        }
        let released = self.catalog.replace(entries, self.releaser.as_mut());
        info!(len = self.catalog.len(), released, "media catalog replaced");
        self.load(0)
    }

    /// Releases a transient URL that never made it into the catalog.
    pub fn release_url(&mut self, url: &str) {
        if url.starts_with("blob:") {
            self.releaser.release(url);
        }
    }

    /// Applies pending decoder completions.
    pub fn pump_media(&mut self) -> Vec<PipelineNotice> {
        let notices = self.pipeline.pump(&self.catalog, self.decoder.as_mut());
        if !notices.is_empty() {
            self.publish_media();
        }
        notices
    }

    /// Samples the spectrum and steps the detector. The beat state lands in
    /// the store before the caller decides anything from the reading.
    pub fn sample_beat(&mut self, now: Duration) -> BeatReading {
        let spectrum = self.sampler.sample();
        let reading = self.detector.step(spectrum.as_ref(), now);
        self.store.update(StatePatch::beat(self.detector.state()));
        reading
    }

    pub fn take_primary_frame(&mut self) -> Option<DecodedFrame> {
        self.pipeline.take_frame(self.decoder.as_mut())
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn take_secondary_frame(&mut self) -> Option<DecodedFrame> {
        let (_, feed) = self.secondary.as_mut()?;
        let frame = feed.latest_frame()?;
        if self.store.state().secondary_size != Some(frame.size) {
            self.store.update(StatePatch {
                secondary_size: Some(Some(frame.size)),
                ..StatePatch::default()
            });
        }
        Some(frame)
    }

    /// Routes the media element's audio into the analyser unless a captured
    /// stream is driving it.
    pub fn connect_media_audio(&mut self) -> bool {
        if self.sampler.origin() == Some(SpectrumOrigin::CapturedStream) {
            debug!("captured stream owns the analyser; media audio stays detached");
            return false;
        }
        match self.decoder.audio_source() {
            Some(source) => {
                self.sampler.connect(source, SpectrumOrigin::MediaElement);
                true
            }
            None => {
                debug!("media element exposes no audio");
                false
            }
        }
    }

    pub fn start_capture(&mut self, capture: &mut dyn MediaCapture, kind: CaptureKind) -> Result<()> {
        let outcome = capture.acquire(kind);
        self.apply_capture(kind, outcome)
    }

    /// Completes a capture request. Failures leave the pipeline running with
    /// its current sources.
    pub fn apply_capture(
        &mut self,
        kind: CaptureKind,
        outcome: std::result::Result<CaptureStream, CaptureError>,
    ) -> Result<()> {
        let stream = match outcome {
            Ok(stream) => stream,
            Err(err) => {
                warn!(?kind, %err, "capture unavailable; continuing without it");
                return Err(err.into());
            }
        };

        match kind {
            CaptureKind::Display => self.attach_display(stream),
            CaptureKind::Camera => self.attach_camera(stream),
        }
    }

    /// Stops a capture. Ending a display capture leaves the analyser
    /// detached; media audio only returns through [`Self::connect_media_audio`].
    pub fn stop_capture(&mut self, kind: CaptureKind) {
        if matches!(self.secondary, Some((origin, _)) if origin == kind) {
            self.drop_secondary();
        }
        if kind == CaptureKind::Display && self.store.state().capture_active {
            self.sampler.disconnect();
            self.store.update(StatePatch {
                capture_active: Some(false),
                ..StatePatch::default()
            });
            info!("display capture stopped; beat detector at rest");
        }
    }

    /// Marks the visual pipeline as permanently stopped.
    pub fn fail_graphics(&mut self) {
        self.graphics = GraphicsStatus::Failed;
    }

    /// Detaches every producer and releases transient URLs. Returns how many
    /// URLs were released.
    pub fn shutdown(&mut self) -> usize {
        self.sampler.disconnect();
        self.drop_secondary();
        let released = self.catalog.reset(self.releaser.as_mut());
        info!(released, "compositor shut down");
        released
    }

    fn attach_display(&mut self, mut stream: CaptureStream) -> Result<()> {
        let Some(audio) = stream.audio.take() else {
            stream.drop_video();
            warn!("display capture carried no audio track");
            return Err(CaptureError::Unavailable("display capture has no audio".into()).into());
        };

        self.sampler.disconnect();
        self.sampler.connect(audio, SpectrumOrigin::CapturedStream);

        match stream.video.take() {
            Some(video) if self.config.display.secondary == SecondarySource::Display => {
                self.install_secondary(CaptureKind::Display, video);
            }
            Some(mut video) => video.stop(),
            None => {}
        }

        self.store.update(StatePatch {
            capture_active: Some(true),
            ..StatePatch::default()
        });
        info!("display capture drives the beat detector");
        Ok(())
    }

    fn attach_camera(&mut self, mut stream: CaptureStream) -> Result<()> {
        if let Some(mut audio) = stream.audio.take() {
            audio.disconnect();
        }
        let Some(mut video) = stream.video.take() else {
            return Err(CaptureError::NotFound.into());
        };
        if self.config.display.secondary != SecondarySource::Camera {
            video.stop();
            warn!(secondary = ?self.config.display.secondary, "camera is not the configured secondary source");
            return Ok(());
        }
        self.install_secondary(CaptureKind::Camera, video);
        info!("camera attached as secondary source");
        Ok(())
    }

    fn install_secondary(&mut self, kind: CaptureKind, video: Box<dyn VideoFeed>) {
        self.drop_secondary();
        let size = video.size();
        self.secondary = Some((kind, video));
        self.store.update(StatePatch {
            secondary_size: Some(size),
            ..StatePatch::default()
        });
    }

    fn drop_secondary(&mut self) {
        if let Some((_, mut feed)) = self.secondary.take() {
            feed.stop();
            self.store.update(StatePatch {
                secondary_size: Some(None),
                ..StatePatch::default()
            });
        }
    }

    fn publish_media(&mut self) {
        self.store.update(StatePatch::media(self.pipeline.state()));
    }
}

impl fmt::Debug for CompositorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositorContext")
            .field("state", self.store.state())
            .field("catalog", &self.catalog.len())
            .field("pipeline", &self.pipeline)
            .field("sampler", &self.sampler)
            .field("secondary", &self.secondary.as_ref().map(|(kind, _)| *kind))
            .field("graphics", &self.graphics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        audio::{Spectrum, SpectrumSource},
        catalog::MediaKind,
        media::{LoadRequest, MediaEvent, MediaSize},
        render::{uniforms, UniformValue},
        testing::{ManualDecoder, RecordingSurface, ScriptedCapture, ScriptedSpectrum},
    };

    #[derive(Default, Clone)]
    struct SharedReleaser(Rc<RefCell<Vec<String>>>);

    impl UrlReleaser for SharedReleaser {
        fn release(&mut self, url: &str) {
            self.0.borrow_mut().push(url.to_string());
        }
    }

    struct FixedFeed(MediaSize);

    impl VideoFeed for FixedFeed {
        fn size(&self) -> Option<MediaSize> {
            Some(self.0)
        }

        fn latest_frame(&mut self) -> Option<DecodedFrame> {
            Some(DecodedFrame::solid(self.0, [0, 0, 0, 255]))
        }
    }

    fn context() -> CompositorContext {
        CompositorContext::new(
            AppConfig::default(),
            Box::new(ManualDecoder::auto_complete(MediaSize::new(1920, 1080))),
        )
        .unwrap()
    }

    /// Media element that hands out a fresh loud tap every time it is asked.
    struct TappedDecoder(ManualDecoder);

    impl MediaDecoder for TappedDecoder {
        fn begin_load(&mut self, request: LoadRequest<'_>) {
            self.0.begin_load(request);
        }

        fn poll_event(&mut self) -> Option<MediaEvent> {
            self.0.poll_event()
        }

        fn next_frame(&mut self) -> Option<DecodedFrame> {
            self.0.next_frame()
        }

        fn audio_source(&mut self) -> Option<Box<dyn SpectrumSource>> {
            Some(Box::new(ScriptedSpectrum::new(vec![Spectrum::new(vec![255; 128])])))
        }
    }

    fn loud() -> CaptureStream {
        CaptureStream::new(
            Some(Box::new(ScriptedSpectrum::new(vec![Spectrum::new(vec![255; 128])]))),
            None,
        )
    }

    #[test]
    fn start_loads_first_entry_and_publishes_readiness() {
        let mut ctx = context();
        ctx.start().unwrap();
        assert_eq!(ctx.state().media.active_index, 0);
        assert!(!ctx.state().media.ready);

        ctx.pump_media();
        assert!(ctx.state().media.ready);
        assert_eq!(ctx.state().media.intrinsic_size, Some(MediaSize::new(1920, 1080)));
    }

    #[test]
    fn link_failure_marks_graphics_failed() {
        let mut ctx = context();
        let mut surface = RecordingSurface::new(800.0, 600.0);
        surface.fail_link = true;
        assert!(ctx.initialize_graphics(&mut surface).is_err());
        assert_eq!(ctx.graphics(), GraphicsStatus::Failed);
    }

    #[test]
    fn resize_rewrites_fit_uniforms_immediately() {
        let mut ctx = context();
        ctx.start().unwrap();
        ctx.pump_media();
        let mut surface = RecordingSurface::new(1920.0, 1080.0);
        ctx.initialize_graphics(&mut surface).unwrap();

        ctx.resize(&mut surface, 1080.0, 1920.0);

        assert_eq!(
            surface.uniform(uniforms::RESOLUTION),
            Some(UniformValue::Vec2(Vec2::new(1080.0, 1920.0)))
        );
        let Some(UniformValue::Vec2(scale)) = surface.uniform(uniforms::FIT_SCALE) else {
            panic!("fit scale not written");
        };
        assert_eq!(scale.x, 1.0);
        assert!(scale.y < 0.5);
    }

    #[test]
    fn display_capture_takes_over_the_analyser() {
        let mut ctx = context();
        let mut capture = ScriptedCapture::granting(loud());
        ctx.start_capture(&mut capture, CaptureKind::Display).unwrap();

        assert!(ctx.state().capture_active);
        assert_eq!(ctx.sampler().origin(), Some(SpectrumOrigin::CapturedStream));
        let reading = ctx.sample_beat(Duration::from_millis(5));
        assert!(reading.advance);

        ctx.stop_capture(CaptureKind::Display);
        assert!(!ctx.state().capture_active);
        assert!(!ctx.sampler().is_connected());
    }

    #[test]
    fn stopping_display_capture_leaves_media_audio_detached() {
        let decoder = TappedDecoder(ManualDecoder::auto_complete(MediaSize::new(1920, 1080)));
        let mut ctx = CompositorContext::new(AppConfig::default(), Box::new(decoder)).unwrap();
        ctx.start().unwrap();
        assert_eq!(ctx.sampler().origin(), Some(SpectrumOrigin::MediaElement));

        let quiet = CaptureStream::new(
            Some(Box::new(ScriptedSpectrum::new(vec![Spectrum::silent(128)]))),
            None,
        );
        ctx.apply_capture(CaptureKind::Display, Ok(quiet)).unwrap();
        ctx.stop_capture(CaptureKind::Display);

        assert!(!ctx.sampler().is_connected());
        assert_eq!(ctx.sampler().origin(), None);
        for frame in 0..10 {
            let reading = ctx.sample_beat(Duration::from_millis(1_000 + frame * 200));
            assert_eq!(reading.beat_strength, 0.0);
            assert!(!reading.advance);
        }
        assert_eq!(ctx.state().beat.beat_strength, 0.0);
    }

    #[test]
    fn denied_capture_leaves_beat_at_rest() {
        let mut ctx = context();
        let mut capture = ScriptedCapture::failing(CaptureError::PermissionDenied);
        let err = ctx.start_capture(&mut capture, CaptureKind::Display).unwrap_err();

        assert!(matches!(err, CompositorError::Acquisition(CaptureError::PermissionDenied)));
        assert!(!ctx.state().capture_active);
        let reading = ctx.sample_beat(Duration::from_millis(5));
        assert_eq!(reading.beat_strength, 0.0);
        assert!(!reading.advance);
    }

    #[test]
    fn camera_becomes_the_secondary_feed() {
        let mut ctx = context();
        let stream = CaptureStream::new(None, Some(Box::new(FixedFeed(MediaSize::new(640, 480)))));
        ctx.apply_capture(CaptureKind::Camera, Ok(stream)).unwrap();

        assert!(ctx.has_secondary());
        assert_eq!(ctx.state().secondary_size, Some(MediaSize::new(640, 480)));
        assert!(ctx.take_secondary_frame().is_some());

        ctx.stop_capture(CaptureKind::Camera);
        assert!(!ctx.has_secondary());
        assert_eq!(ctx.state().secondary_size, None);
    }

    #[test]
    fn replacing_and_shutting_down_release_transient_urls() {
        let released = SharedReleaser::default();
        let mut ctx = context().with_releaser(Box::new(released.clone()));

        ctx.replace_catalog(vec![
            MediaDescriptor::new("blob:one", MediaKind::Video),
            MediaDescriptor::new("blob:two", MediaKind::Image),
        ])
        .unwrap();
        ctx.replace_catalog(vec![MediaDescriptor::new("blob:two", MediaKind::Image)])
            .unwrap();
        assert_eq!(*released.0.borrow(), vec!["blob:one".to_string()]);

        assert_eq!(ctx.shutdown(), 1);
        assert_eq!(
            *released.0.borrow(),
            vec!["blob:one".to_string(), "blob:two".to_string()]
        );
    }

    #[test]
    fn empty_replacement_keeps_the_catalog() {
        let mut ctx = context();
        let before = ctx.catalog().len();
        assert!(matches!(
            ctx.replace_catalog(Vec::new()),
            Err(CompositorError::EmptyCatalog)
        ));
        assert_eq!(ctx.catalog().len(), before);
    }
}
