use std::fmt;

use tracing::{debug, info};

mod capture;

pub use capture::{CaptureKind, CaptureStream, MediaCapture};

/// Fixed-length frequency magnitude snapshot, one byte (0–255) per bin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Spectrum(Vec<u8>);

impl Spectrum {
    pub fn new(bins: Vec<u8>) -> Self {
        Self(bins)
    }

    pub fn silent(len: usize) -> Self {
        Self(vec![0; len])
    }

    pub fn bins(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Spectrum {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

/// Live audio analysis capability.
pub trait SpectrumSource {
    /// Number of bins every snapshot carries.
    fn bin_count(&self) -> usize;

    /// Current magnitudes, or `None` while the producer has nothing to say.
    fn snapshot(&mut self) -> Option<Spectrum>;

    /// Detaches the source from whatever feeds it. Calling this on an
    /// already detached source must be a no-op.
    fn disconnect(&mut self) {}
}

/// What currently feeds the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumOrigin {
    /// Audio track of the media element being displayed.
    MediaElement,
    /// A captured display or microphone stream.
    CapturedStream,
}

/// Owns the single connected [`SpectrumSource`], if any. Connecting a new
/// source always tears down the previous one first.
#[derive(Default)]
pub struct SpectrumSampler {
    source: Option<Box<dyn SpectrumSource>>,
    origin: Option<SpectrumOrigin>,
}

impl SpectrumSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, source: Box<dyn SpectrumSource>, origin: SpectrumOrigin) {
        self.disconnect();
        info!(?origin, bins = source.bin_count(), "connected spectrum source");
        self.source = Some(source);
        self.origin = Some(origin);
    }

    /// Returns whether a source was actually detached.
    pub fn disconnect(&mut self) -> bool {
        self.origin = None;
        match self.source.take() {
            Some(mut source) => {
                source.disconnect();
                true
            }
            None => {
                debug!("spectrum sampler already disconnected");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    pub fn origin(&self) -> Option<SpectrumOrigin> {
        self.origin
    }

    /// Snapshot from the connected source. `None` when nothing is connected.
    pub fn sample(&mut self) -> Option<Spectrum> {
        self.source.as_mut().and_then(|source| source.snapshot())
    }
}

impl fmt::Debug for SpectrumSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumSampler")
            .field("connected", &self.source.is_some())
            .field("origin", &self.origin)
            .finish()
    }
}
