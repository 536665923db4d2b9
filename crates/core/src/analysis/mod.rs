use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use tracing::warn;

use crate::{audio::Spectrum, AnalyserConfig, CompositorError, Result, SpectrumSource};

/// Turns raw PCM into byte frequency snapshots: a Blackman window over the
/// most recent `fft_size` samples, magnitudes scaled by `1/N`, exponential
/// smoothing between snapshots, then decibels mapped linearly from
/// `[min_decibels, max_decibels]` onto `[0, 255]`.
pub struct SpectrumAnalyser {
    config: AnalyserConfig,
    history: Vec<f32>,
    write_pos: usize,
    received: bool,
    connected: bool,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl SpectrumAnalyser {
    pub fn new(config: AnalyserConfig) -> Result<Self> {
        let size = config.fft_size;
        if size < 2 || !size.is_power_of_two() {
            return Err(CompositorError::InvalidInput(
                "fft size must be a power of two",
            ));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            history: vec![0.0; size],
            write_pos: 0,
            received: false,
            connected: true,
            window: (0..size).map(|i| blackman_value(i, size)).collect(),
            smoothed: vec![0.0; size / 2],
            fft,
            config,
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    /// Appends mono samples to the analysis window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if !self.connected || samples.is_empty() {
            return;
        }
        let len = self.history.len();
        for &sample in samples {
            self.history[self.write_pos] = if sample.is_finite() { sample } else { 0.0 };
            self.write_pos = (self.write_pos + 1) % len;
        }
        self.received = true;
    }

    /// Computes a snapshot from the most recent window of samples.
    pub fn byte_frequency_data(&mut self) -> Result<Spectrum> {
        let size = self.history.len();
        for i in 0..size {
            let sample = self.history[(self.write_pos + i) % size];
            self.fft.input[i] = sample * self.window[i];
        }

        self.fft
            .plan
            .process_with_scratch(&mut self.fft.input, &mut self.fft.spectrum, &mut self.fft.scratch)
            .map_err(|err| CompositorError::msg(format!("spectrum transform failed: {err}")))?;

        let smoothing = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let scale = 255.0 / range;
        let norm = 1.0 / size as f32;

        let bins = self
            .smoothed
            .iter_mut()
            .zip(&self.fft.spectrum)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * norm;
                *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
                if *smoothed <= f32::MIN_POSITIVE {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (scale * (db - self.config.min_decibels)).clamp(0.0, 255.0) as u8
            })
            .collect();

        Ok(Spectrum::new(bins))
    }
}

impl SpectrumSource for SpectrumAnalyser {
    fn bin_count(&self) -> usize {
        self.config.bin_count()
    }

    fn snapshot(&mut self) -> Option<Spectrum> {
        if !self.connected || !self.received {
            return None;
        }
        match self.byte_frequency_data() {
            Ok(spectrum) => Some(spectrum),
            Err(err) => {
                warn!(%err, "dropping spectrum snapshot");
                None
            }
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("config", &self.config)
            .field("received", &self.received)
            .field("connected", &self.connected)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let x = index as f32 / len as f32;

    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}
