//! Camera and display capture.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::SpectrumSource;
use crate::{error::CaptureError, media::VideoFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    Camera,
    Display,
}

/// Tracks handed over by a successful acquisition. Either half may be
/// missing, e.g. a display share without system audio.
#[derive(Default)]
pub struct CaptureStream {
    pub audio: Option<Box<dyn SpectrumSource>>,
    pub video: Option<Box<dyn VideoFeed>>,
}

impl CaptureStream {
    pub fn new(
        audio: Option<Box<dyn SpectrumSource>>,
        video: Option<Box<dyn VideoFeed>>,
    ) -> Self {
        Self { audio, video }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Stops the video tracks and keeps only the audio.
    pub fn drop_video(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.stop();
        }
    }
}

impl fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStream")
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .finish()
    }
}

/// Device capture capability.
///
/// On hosts where acquisition is asynchronous, the permission prompt
/// resolves outside the frame loop and the outcome is delivered later
/// through `CompositorContext::apply_capture`. This trait covers hosts that
/// can answer synchronously.
pub trait MediaCapture {
    fn acquire(&mut self, kind: CaptureKind) -> Result<CaptureStream, CaptureError>;
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::media::{DecodedFrame, MediaSize};

    struct StoppableFeed(Rc<Cell<bool>>);

    impl VideoFeed for StoppableFeed {
        fn size(&self) -> Option<MediaSize> {
            Some(MediaSize::new(640, 480))
        }

        fn latest_frame(&mut self) -> Option<DecodedFrame> {
            None
        }

        fn stop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn dropping_video_stops_the_tracks() {
        let stopped = Rc::new(Cell::new(false));
        let mut stream = CaptureStream::new(None, Some(Box::new(StoppableFeed(stopped.clone()))));
        stream.drop_video();
        assert!(stopped.get());
        assert!(!stream.has_video());
    }
}
