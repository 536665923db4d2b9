//! Active media slot: which catalog entry is shown, whether it has decoded
//! far enough to be drawn, and its intrinsic size.
//!
//! Every load is tagged with a [`LoadTicket`] carrying a generation number.
//! Completions from the decoder echo their ticket back; any completion whose
//! generation is not the current one belongs to a superseded load and is
//! dropped.

use std::{fmt, sync::Arc};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::SpectrumSource,
    catalog::{MediaCatalog, MediaDescriptor, MediaKind},
    state::MediaState,
    CompositorError, Result,
};

/// Intrinsic pixel dimensions of a decoded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaSize {
    pub width: u32,
    pub height: u32,
}

impl MediaSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_vec2(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    Loading,
    Ready,
    Ended,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub index: usize,
    pub generation: u64,
}

/// Asynchronous completion reported by a [`MediaDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Decode metadata is available; the first frame can be drawn.
    Loaded { ticket: LoadTicket, size: MediaSize },
    /// A non-looping video reached its end.
    Ended { ticket: LoadTicket },
    Failed { ticket: LoadTicket, reason: String },
}

impl MediaEvent {
    pub fn ticket(&self) -> LoadTicket {
        match self {
            Self::Loaded { ticket, .. } | Self::Ended { ticket } | Self::Failed { ticket, .. } => {
                *ticket
            }
        }
    }
}

/// RGBA8 pixels ready for upload.
#[derive(Clone, PartialEq)]
pub struct DecodedFrame {
    pub size: MediaSize,
    pub pixels: Arc<[u8]>,
}

impl DecodedFrame {
    pub fn new(size: MediaSize, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            size,
            pixels: pixels.into(),
        }
    }

    /// Single-colour frame, handy for stand-in decoders.
    pub fn solid(size: MediaSize, rgba: [u8; 4]) -> Self {
        let count = size.width as usize * size.height as usize;
        let pixels: Vec<u8> = rgba.iter().copied().cycle().take(count * 4).collect();
        Self::new(size, pixels)
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("size", &self.size)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub descriptor: &'a MediaDescriptor,
    pub ticket: LoadTicket,
    pub looping: bool,
}

/// The media element capability: decodes one source at a time.
pub trait MediaDecoder {
    /// Starts loading a source, abandoning whatever was loading before.
    /// Completions are reported through [`MediaDecoder::poll_event`] with the
    /// request's ticket.
    fn begin_load(&mut self, request: LoadRequest<'_>);

    fn poll_event(&mut self) -> Option<MediaEvent>;

    /// A frame decoded since the last call, if any.
    fn next_frame(&mut self) -> Option<DecodedFrame>;

    /// Analyser tap on the element's audio output. Hosts without audio
    /// return `None` and the beat detector stays at rest.
    fn audio_source(&mut self) -> Option<Box<dyn SpectrumSource>> {
        None
    }
}

/// Live video from a capture device, used as the secondary source.
pub trait VideoFeed {
    fn size(&self) -> Option<MediaSize>;

    fn latest_frame(&mut self) -> Option<DecodedFrame>;

    /// Stops the underlying tracks. Safe to call more than once.
    fn stop(&mut self) {}
}

/// What [`MediaPipeline::handle_event`] changed.
#[derive(Debug)]
pub enum PipelineNotice {
    Ready { index: usize, size: MediaSize },
    /// The video ended and the next entry started loading.
    Advanced { from: usize, to: usize },
    Failed { index: usize, error: CompositorError },
}

type ReadyListener = Box<dyn FnMut(usize, MediaSize)>;

pub struct MediaPipeline {
    looping: bool,
    active_index: usize,
    kind: Option<MediaKind>,
    slot: SlotState,
    generation: u64,
    intrinsic_size: Option<MediaSize>,
    ready_listeners: Vec<ReadyListener>,
}

impl MediaPipeline {
    pub fn new(looping: bool) -> Self {
        Self {
            looping,
            active_index: 0,
            kind: None,
            slot: SlotState::Idle,
            generation: 0,
            intrinsic_size: None,
            ready_listeners: Vec::new(),
        }
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn slot(&self) -> SlotState {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ready(&self) -> bool {
        self.slot == SlotState::Ready
    }

    /// Last size published by a ready transition. Kept while a newer source
    /// loads so the stale frame stays correctly fitted.
    pub fn current_intrinsic_size(&self) -> Option<MediaSize> {
        self.intrinsic_size
    }

    pub fn state(&self) -> MediaState {
        MediaState {
            active_index: self.active_index,
            kind: self.kind,
            slot: self.slot,
            intrinsic_size: self.intrinsic_size,
            ready: self.is_ready(),
        }
    }

    /// Registers a callback run on every accepted ready transition.
    pub fn on_ready(&mut self, listener: impl FnMut(usize, MediaSize) + 'static) {
        self.ready_listeners.push(Box::new(listener));
    }

    /// Starts loading `index`. Readiness drops immediately; the previous
    /// texture stays bound until the new source is ready.
    pub fn load(
        &mut self,
        index: usize,
        catalog: &MediaCatalog,
        decoder: &mut dyn MediaDecoder,
    ) -> Result<LoadTicket> {
        if catalog.is_empty() {
            warn!("no media sources available");
            return Err(CompositorError::EmptyCatalog);
        }
        let descriptor = catalog.get(index).ok_or_else(|| {
            warn!(index, len = catalog.len(), "invalid media index");
            CompositorError::IndexOutOfRange {
                index,
                len: catalog.len(),
            }
        })?;

        self.generation += 1;
        self.active_index = index;
        self.kind = Some(descriptor.kind());
        self.slot = SlotState::Loading;

        let ticket = LoadTicket {
            index,
            generation: self.generation,
        };
        info!(index, url = descriptor.url(), kind = ?descriptor.kind(), "loading media");
        decoder.begin_load(LoadRequest {
            descriptor,
            ticket,
            looping: self.looping && descriptor.kind() == MediaKind::Video,
        });
        Ok(ticket)
    }

    pub fn swap_to_next(
        &mut self,
        catalog: &MediaCatalog,
        decoder: &mut dyn MediaDecoder,
    ) -> Result<LoadTicket> {
        let index = catalog
            .next_index(self.active_index)
            .ok_or(CompositorError::EmptyCatalog)?;
        self.load(index, catalog, decoder)
    }

    pub fn swap_to_previous(
        &mut self,
        catalog: &MediaCatalog,
        decoder: &mut dyn MediaDecoder,
    ) -> Result<LoadTicket> {
        let index = catalog
            .previous_index(self.active_index)
            .ok_or(CompositorError::EmptyCatalog)?;
        self.load(index, catalog, decoder)
    }

    /// Applies one decoder completion. Stale completions return `None`.
    pub fn handle_event(
        &mut self,
        event: MediaEvent,
        catalog: &MediaCatalog,
        decoder: &mut dyn MediaDecoder,
    ) -> Option<PipelineNotice> {
        let ticket = event.ticket();
        if ticket.generation != self.generation {
            debug!(
                ?ticket,
                current = self.generation,
                "dropping completion from superseded load"
            );
            return None;
        }

        match event {
            MediaEvent::Loaded { size, .. } => {
                self.slot = SlotState::Ready;
                self.intrinsic_size = Some(size);
                for listener in &mut self.ready_listeners {
                    listener(ticket.index, size);
                }
                Some(PipelineNotice::Ready {
                    index: ticket.index,
                    size,
                })
            }
            MediaEvent::Ended { .. } => self.handle_ended(ticket, catalog, decoder),
            MediaEvent::Failed { reason, .. } => {
                self.slot = SlotState::Error;
                let url = catalog
                    .get(ticket.index)
                    .map(|d| d.url().to_string())
                    .unwrap_or_default();
                let error = CompositorError::Decode { url, reason };
                warn!(%error, "media failed to load; keeping previous frame");
                Some(PipelineNotice::Failed {
                    index: ticket.index,
                    error,
                })
            }
        }
    }

    /// Drains every pending decoder completion.
    pub fn pump(
        &mut self,
        catalog: &MediaCatalog,
        decoder: &mut dyn MediaDecoder,
    ) -> Vec<PipelineNotice> {
        let mut notices = Vec::new();
        while let Some(event) = decoder.poll_event() {
            notices.extend(self.handle_event(event, catalog, decoder));
        }
        notices
    }

    /// The next decoded frame to upload, if the slot is drawable.
    pub fn take_frame(&self, decoder: &mut dyn MediaDecoder) -> Option<DecodedFrame> {
        if self.is_ready() {
            decoder.next_frame()
        } else {
            None
        }
    }

    fn handle_ended(
        &mut self,
        ticket: LoadTicket,
        catalog: &MediaCatalog,
        decoder: &mut dyn MediaDecoder,
    ) -> Option<PipelineNotice> {
        if self.kind != Some(MediaKind::Video) || self.slot != SlotState::Ready {
            debug!(?ticket, slot = ?self.slot, "ignoring end of non-playing media");
            return None;
        }
        if self.looping {
            debug!(?ticket, "looping video restarted by decoder");
            return None;
        }

        self.slot = SlotState::Ended;
        let from = self.active_index;
        match self.swap_to_next(catalog, decoder) {
            Ok(next) => Some(PipelineNotice::Advanced {
                from,
                to: next.index,
            }),
            Err(error) => {
                warn!(%error, "could not advance after video ended");
                None
            }
        }
    }
}

impl fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("looping", &self.looping)
            .field("active_index", &self.active_index)
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("intrinsic_size", &self.intrinsic_size)
            .field("ready_listeners", &self.ready_listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::testing::ManualDecoder;

    fn catalog() -> MediaCatalog {
        MediaCatalog::new(vec![
            MediaDescriptor::new("a.mp4", MediaKind::Video),
            MediaDescriptor::new("b.png", MediaKind::Image),
            MediaDescriptor::new("c.mp4", MediaKind::Video),
        ])
    }

    fn loaded(ticket: LoadTicket, w: u32, h: u32) -> MediaEvent {
        MediaEvent::Loaded {
            ticket,
            size: MediaSize::new(w, h),
        }
    }

    #[test]
    fn ready_publishes_size_and_notifies_listeners() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        pipeline.on_ready(move |index, size| log.borrow_mut().push((index, size)));

        let ticket = pipeline.load(0, &catalog, &mut decoder).unwrap();
        assert_eq!(pipeline.slot(), SlotState::Loading);
        assert_eq!(pipeline.current_intrinsic_size(), None);

        decoder.push_event(loaded(ticket, 1920, 1080));
        let notices = pipeline.pump(&catalog, &mut decoder);

        assert!(matches!(notices[..], [PipelineNotice::Ready { index: 0, .. }]));
        assert!(pipeline.is_ready());
        assert_eq!(*seen.borrow(), vec![(0, MediaSize::new(1920, 1080))]);
    }

    #[test]
    fn stale_ready_from_slow_load_is_dropped() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);

        let slow = pipeline.load(0, &catalog, &mut decoder).unwrap();
        let fresh = pipeline.swap_to_next(&catalog, &mut decoder).unwrap();

        decoder.push_event(loaded(slow, 640, 480));
        assert!(pipeline.pump(&catalog, &mut decoder).is_empty());
        assert_eq!(pipeline.slot(), SlotState::Loading);
        assert_eq!(pipeline.active_index(), 1);

        decoder.push_event(loaded(fresh, 800, 800));
        pipeline.pump(&catalog, &mut decoder);
        assert_eq!(pipeline.current_intrinsic_size(), Some(MediaSize::new(800, 800)));
    }

    #[test]
    fn swapping_drops_readiness_but_keeps_size() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);
        let ticket = pipeline.load(2, &catalog, &mut decoder).unwrap();
        decoder.push_event(loaded(ticket, 1280, 720));
        pipeline.pump(&catalog, &mut decoder);

        pipeline.swap_to_next(&catalog, &mut decoder).unwrap();
        assert_eq!(pipeline.active_index(), 0);
        assert!(!pipeline.is_ready());
        assert_eq!(pipeline.current_intrinsic_size(), Some(MediaSize::new(1280, 720)));
    }

    #[test]
    fn ended_video_advances_with_wrap_around() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);
        let ticket = pipeline.load(2, &catalog, &mut decoder).unwrap();
        decoder.push_event(loaded(ticket, 1280, 720));
        decoder.push_event(MediaEvent::Ended { ticket });

        let notices = pipeline.pump(&catalog, &mut decoder);

        assert!(matches!(notices[1], PipelineNotice::Advanced { from: 2, to: 0 }));
        assert_eq!(pipeline.slot(), SlotState::Loading);
        assert_eq!(decoder.requests.last().unwrap().0, "a.mp4");
    }

    #[test]
    fn looping_video_does_not_advance() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(true);
        let ticket = pipeline.load(0, &catalog, &mut decoder).unwrap();
        assert!(decoder.requests[0].2);
        decoder.push_event(loaded(ticket, 10, 10));
        decoder.push_event(MediaEvent::Ended { ticket });

        pipeline.pump(&catalog, &mut decoder);
        assert_eq!(pipeline.active_index(), 0);
        assert!(pipeline.is_ready());
    }

    #[test]
    fn images_have_no_end_state() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);
        let ticket = pipeline.load(1, &catalog, &mut decoder).unwrap();
        assert!(!decoder.requests[0].2);
        decoder.push_event(loaded(ticket, 10, 10));
        decoder.push_event(MediaEvent::Ended { ticket });

        pipeline.pump(&catalog, &mut decoder);
        assert_eq!(pipeline.slot(), SlotState::Ready);
    }

    #[test]
    fn failure_is_reported_without_advancing() {
        let catalog = catalog();
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);
        let ticket = pipeline.load(0, &catalog, &mut decoder).unwrap();
        decoder.push_event(MediaEvent::Failed {
            ticket,
            reason: "404".into(),
        });
        decoder.push_frame(DecodedFrame::solid(MediaSize::new(1, 1), [0; 4]));

        let notices = pipeline.pump(&catalog, &mut decoder);

        assert!(matches!(
            &notices[..],
            [PipelineNotice::Failed { index: 0, error: CompositorError::Decode { .. } }]
        ));
        assert_eq!(pipeline.slot(), SlotState::Error);
        assert_eq!(pipeline.active_index(), 0);
        assert!(pipeline.take_frame(&mut decoder).is_none());
    }

    #[test]
    fn load_rejects_bad_indices() {
        let mut decoder = ManualDecoder::new();
        let mut pipeline = MediaPipeline::new(false);
        assert!(matches!(
            pipeline.load(0, &MediaCatalog::default(), &mut decoder),
            Err(CompositorError::EmptyCatalog)
        ));
        assert!(matches!(
            pipeline.load(7, &catalog(), &mut decoder),
            Err(CompositorError::IndexOutOfRange { index: 7, len: 3 })
        ));
        assert!(decoder.requests.is_empty());
    }
}
