//! Stand-ins for the host capabilities so the pipeline can run without a
//! window, a GPU or a media stack.

use std::{cell::Cell, collections::HashMap, f32::consts::TAU, rc::Rc, time::Duration};

use glam::Vec2;
use reactive_compositor_core::{
    analysis::SpectrumAnalyser,
    catalog::MediaKind,
    media::LoadRequest,
    render::{ProgramHandle, TextureHandle},
    AnalyserConfig, DecodedFrame, GraphicsSurface, LoadTicket, MediaDecoder, MediaEvent,
    MediaSize, Result, Spectrum, SpectrumSource, UniformValue,
};
use tracing::{debug, trace};

const SAMPLE_RATE: f32 = 44_100.0;

/// Surface that only counts what it is asked to do.
#[derive(Debug)]
pub struct LoggingSurface {
    size: Vec2,
    next_handle: u32,
    pub draws: u64,
    pub uploads: u64,
    pub uniforms: HashMap<String, UniformValue>,
}

impl LoggingSurface {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            size: Vec2::new(width, height),
            next_handle: 1,
            draws: 0,
            uploads: 0,
            uniforms: HashMap::new(),
        }
    }

    fn handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl GraphicsSurface for LoggingSurface {
    fn size(&self) -> Vec2 {
        self.size
    }

    fn create_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle> {
        debug!(vertex_len = vertex.len(), fragment_len = fragment.len(), "compiling program");
        Ok(ProgramHandle(self.handle()))
    }

    fn create_texture(&mut self, unit: u32) -> Result<TextureHandle> {
        debug!(unit, "creating texture");
        Ok(TextureHandle(self.handle()))
    }

    fn set_uniform(&mut self, _program: ProgramHandle, name: &str, value: UniformValue) {
        trace!(name, ?value, "uniform");
        self.uniforms.insert(name.to_string(), value);
    }

    fn upload_image(&mut self, texture: TextureHandle, frame: &DecodedFrame) -> Result<()> {
        trace!(?texture, ?frame, "upload");
        self.uploads += 1;
        Ok(())
    }

    fn draw(&mut self, _program: ProgramHandle, vertex_count: u32) -> Result<()> {
        trace!(vertex_count, "draw");
        self.draws += 1;
        Ok(())
    }
}

/// Kick drum pattern rendered to PCM and run through the FFT analyser.
pub struct SyntheticKick {
    analyser: SpectrumAnalyser,
    beat_period: f32,
    samples_per_frame: usize,
    bin_hz: f32,
    cursor: u64,
}

impl SyntheticKick {
    pub fn new(config: AnalyserConfig, bpm: f32, frame: Duration) -> Result<Self> {
        let bin_hz = SAMPLE_RATE / config.fft_size as f32;
        Ok(Self {
            analyser: SpectrumAnalyser::new(config)?,
            beat_period: 60.0 / bpm.max(1.0),
            samples_per_frame: (SAMPLE_RATE * frame.as_secs_f32()).round().max(1.0) as usize,
            bin_hz,
            cursor: 0,
        })
    }

    /// Decaying chord covering the bass and mid bands at each beat.
    fn sample_at(&self, index: u64) -> f32 {
        let t = index as f32 / SAMPLE_RATE;
        let phase = t % self.beat_period;
        if phase > 0.15 {
            return 0.0;
        }
        let envelope = (-phase * 25.0).exp();
        let body: f32 = (1..=12)
            .map(|k| (TAU * k as f32 * self.bin_hz * t).sin())
            .sum();
        envelope * 0.3 * body
    }
}

impl SpectrumSource for SyntheticKick {
    fn bin_count(&self) -> usize {
        self.analyser.bin_count()
    }

    fn snapshot(&mut self) -> Option<Spectrum> {
        let block: Vec<f32> = (0..self.samples_per_frame as u64)
            .map(|i| self.sample_at(self.cursor + i))
            .collect();
        self.cursor += self.samples_per_frame as u64;
        self.analyser.push_samples(&block);
        self.analyser.snapshot()
    }

    fn disconnect(&mut self) {
        self.analyser.disconnect();
    }
}

struct Playing {
    ticket: LoadTicket,
    kind: MediaKind,
    size: MediaSize,
    looping: bool,
    ends_at: Duration,
    ended: bool,
}

/// Decoder whose loads complete after a fixed delay on a shared clock.
pub struct TimedDecoder {
    clock: Rc<Cell<Duration>>,
    load_delay: Duration,
    video_length: Duration,
    pending: Option<(LoadTicket, MediaKind, bool, Duration)>,
    playing: Option<Playing>,
    audio: Option<SyntheticKick>,
}

impl TimedDecoder {
    pub fn new(
        clock: Rc<Cell<Duration>>,
        load_delay: Duration,
        video_length: Duration,
        audio: SyntheticKick,
    ) -> Self {
        Self {
            clock,
            load_delay,
            video_length,
            pending: None,
            playing: None,
            audio: Some(audio),
        }
    }

    /// Alternates landscape and portrait sources so the fit math varies.
    fn size_for(index: usize) -> MediaSize {
        if index % 2 == 0 {
            MediaSize::new(320, 180)
        } else {
            MediaSize::new(180, 320)
        }
    }
}

impl MediaDecoder for TimedDecoder {
    fn begin_load(&mut self, request: LoadRequest<'_>) {
        debug!(url = request.descriptor.url(), ticket = ?request.ticket, "decoder load");
        self.playing = None;
        self.pending = Some((
            request.ticket,
            request.descriptor.kind(),
            request.looping,
            self.clock.get() + self.load_delay,
        ));
    }

    fn poll_event(&mut self) -> Option<MediaEvent> {
        let now = self.clock.get();

        if let Some((ticket, kind, looping, ready_at)) = self.pending {
            if now < ready_at {
                return None;
            }
            self.pending = None;
            let size = Self::size_for(ticket.index);
            self.playing = Some(Playing {
                ticket,
                kind,
                size,
                looping,
                ends_at: now + self.video_length,
                ended: false,
            });
            return Some(MediaEvent::Loaded { ticket, size });
        }

        let playing = self.playing.as_mut()?;
        if playing.kind != MediaKind::Video || playing.ended || now < playing.ends_at {
            return None;
        }
        if playing.looping {
            playing.ends_at = now + self.video_length;
            return None;
        }
        playing.ended = true;
        Some(MediaEvent::Ended {
            ticket: playing.ticket,
        })
    }

    fn next_frame(&mut self) -> Option<DecodedFrame> {
        let playing = self.playing.as_ref()?;
        let shade = (playing.ticket.index as u8).wrapping_mul(60);
        Some(DecodedFrame::solid(playing.size, [shade, 128, 255 - shade, 255]))
    }

    fn audio_source(&mut self) -> Option<Box<dyn SpectrumSource>> {
        self.audio
            .take()
            .map(|audio| Box::new(audio) as Box<dyn SpectrumSource>)
    }
}
