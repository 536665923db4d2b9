//! Beat detection over byte frequency snapshots.
//!
//! Each frame the bass band (leading bins) and mid band (following bins) are
//! averaged and normalised to `[0, 1]`, then combined with a fixed weighting
//! that favours low frequencies. The combined beat strength drives two
//! outputs: a decaying effect intensity and a debounced "advance media"
//! trigger.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{audio::Spectrum, BeatConfig};

/// Detector state carried from frame to frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BeatState {
    pub bass_avg: f32,
    pub mid_avg: f32,
    pub beat_strength: f32,
    /// Monotonically non-increasing between refreshes.
    pub effect_intensity: f32,
    /// Only moves when a trigger fires.
    pub last_trigger: Option<Duration>,
}

/// Outcome of one detector step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeatReading {
    pub beat_strength: f32,
    pub effect_intensity: f32,
    pub advance: bool,
}

#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: BeatConfig,
    state: BeatState,
}

impl BeatDetector {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            config,
            state: BeatState::default(),
        }
    }

    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    pub fn state(&self) -> BeatState {
        self.state
    }

    /// Processes one snapshot taken at `now` (time since the session started).
    pub fn sample(&mut self, spectrum: &Spectrum, now: Duration) -> BeatReading {
        let (bass_avg, mid_avg) = self.band_averages(spectrum.bins());
        let beat_strength =
            (self.config.bass_weight * bass_avg + self.config.mid_weight * mid_avg).clamp(0.0, 1.0);

        self.state.bass_avg = bass_avg;
        self.state.mid_avg = mid_avg;
        self.state.beat_strength = beat_strength;

        if beat_strength > self.config.chromatic_threshold {
            self.state.effect_intensity = beat_strength;
        } else {
            self.decay_effect();
        }

        let cooled_down = self
            .state
            .last_trigger
            .map(|last| now.saturating_sub(last) > self.config.min_interval())
            .unwrap_or(true);
        let advance = beat_strength > self.config.beat_threshold && cooled_down;
        if advance {
            self.state.last_trigger = Some(now);
        }

        self.reading(advance)
    }

    /// Step for frames without audio: the effect keeps decaying and nothing
    /// fires.
    pub fn idle(&mut self) -> BeatReading {
        self.state.bass_avg = 0.0;
        self.state.mid_avg = 0.0;
        self.state.beat_strength = 0.0;
        self.decay_effect();
        self.reading(false)
    }

    /// Convenience wrapper choosing between [`Self::sample`] and
    /// [`Self::idle`].
    pub fn step(&mut self, spectrum: Option<&Spectrum>, now: Duration) -> BeatReading {
        match spectrum {
            Some(spectrum) => self.sample(spectrum, now),
            None => self.idle(),
        }
    }

    /// Bass and mid band means normalised to `[0, 1]`. Bins missing from a
    /// short snapshot count as silence.
    pub fn band_averages(&self, bins: &[u8]) -> (f32, f32) {
        let bass_end = self.config.bass_bins;
        let mid_end = bass_end + self.config.mid_bins;

        let bass = band_sum(bins, 0, bass_end) / (self.config.bass_bins as f32 * 255.0);
        let mid = band_sum(bins, bass_end, mid_end) / (self.config.mid_bins as f32 * 255.0);
        (bass, mid)
    }

    fn decay_effect(&mut self) {
        self.state.effect_intensity *= self.config.decay;
    }

    fn reading(&self, advance: bool) -> BeatReading {
        BeatReading {
            beat_strength: self.state.beat_strength,
            effect_intensity: self.state.effect_intensity,
            advance,
        }
    }
}

fn band_sum(bins: &[u8], start: usize, end: usize) -> f32 {
    let end = end.min(bins.len());
    let start = start.min(end);
    bins[start..end].iter().map(|&b| f32::from(b)).sum()
}
