use std::{fs, path::Path, time::Duration};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{MediaDescriptor, MediaKind},
    state::DisplayMode,
    CompositorError, Result,
};

/// Largest horizontal channel offset the aberration pass may use, in
/// normalised texture units.
pub const MAX_ABERRATION_SCALE: f32 = 0.05;

/// Lowest accepted frame-rate cap.
pub const MIN_FPS_CAP: f32 = 1.0;

/// Named tunings for the compositor. Both share one pipeline and differ only
/// in constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Strong grade with a base contrast curve and beat driven aberration.
    Punchy,
    /// Gentle grade with an inverted contrast axis and no base curve.
    Subtle,
}

impl std::str::FromStr for Preset {
    type Err = CompositorError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "punchy" => Ok(Self::Punchy),
            "subtle" => Ok(Self::Subtle),
            other => Err(CompositorError::Config(format!("unknown preset `{other}`"))),
        }
    }
}

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub beat: BeatConfig,
    pub analyser: AnalyserConfig,
    pub grade: GradeProfile,
    pub contrast: ContrastProfile,
    pub effects: EffectConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub media: Vec<MediaDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::preset(Preset::Punchy)
    }
}

impl AppConfig {
    pub fn preset(preset: Preset) -> Self {
        let (grade, contrast) = match preset {
            Preset::Punchy => (GradeProfile::punchy(), ContrastProfile::punchy()),
            Preset::Subtle => (GradeProfile::subtle(), ContrastProfile::subtle()),
        };

        Self {
            beat: BeatConfig::default(),
            analyser: AnalyserConfig::default(),
            grade,
            contrast,
            effects: EffectConfig::default(),
            display: DisplayConfig::default(),
            pipeline: PipelineConfig::default(),
            media: default_media(),
        }
    }

    /// Reads a JSON configuration file. Missing sections fall back to the
    /// default preset.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.beat.validate()?;
        self.analyser.validate()?;
        self.effects.validate()?;

        if !(0.0..=100.0).contains(&self.display.divider_position) {
            return Err(CompositorError::Config(format!(
                "divider position {} must lie in [0, 100]",
                self.display.divider_position
            )));
        }
        if let Some(fps) = self.pipeline.max_fps {
            if !(fps.is_finite() && fps >= MIN_FPS_CAP) {
                return Err(CompositorError::Config(format!(
                    "max_fps must be at least {MIN_FPS_CAP}, got {fps}"
                )));
            }
        }

        let grade = &self.grade;
        check_edges("grade.temperature_edges", grade.temperature_edges)?;
        check_edges("grade.highlight_edges", grade.highlight_edges)?;
        check_edges("grade.shadow_edges", grade.shadow_edges)?;
        check_edges("contrast.highlight_knee", self.contrast.highlight_knee)?;
        check_edges("effects.vignette_radii", self.effects.vignette_radii)?;
        Ok(())
    }
}

/// Tuning for [`crate::BeatDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Number of leading bins averaged into the bass band.
    pub bass_bins: usize,
    /// Number of bins following the bass band averaged into the mid band.
    pub mid_bins: usize,
    pub bass_weight: f32,
    pub mid_weight: f32,
    /// Beat strength above which the media advances.
    pub beat_threshold: f32,
    /// Beat strength above which the effect intensity is refreshed.
    pub chromatic_threshold: f32,
    /// Multiplicative per-frame decay of the effect intensity.
    pub decay: f32,
    pub min_interval_ms: u64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            bass_bins: 4,
            mid_bins: 8,
            bass_weight: 0.7,
            mid_weight: 0.3,
            beat_threshold: 0.80,
            chromatic_threshold: 0.80,
            decay: 0.9,
            min_interval_ms: 100,
        }
    }
}

impl BeatConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.bass_bins == 0 || self.mid_bins == 0 {
            return Err(CompositorError::Config(
                "beat bands need at least one bin each".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decay) {
            return Err(CompositorError::Config(format!(
                "effect decay {} must lie in [0, 1]",
                self.decay
            )));
        }
        let weights = self.bass_weight + self.mid_weight;
        if self.bass_weight < 0.0 || self.mid_weight < 0.0 || weights > 1.0 + f32::EPSILON {
            return Err(CompositorError::Config(format!(
                "band weights must be non-negative and sum to at most 1, got {weights}"
            )));
        }
        Ok(())
    }
}

/// Settings for [`crate::SpectrumAnalyser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    pub fft_size: usize,
    /// Exponential smoothing applied between successive snapshots.
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyserConfig {
    /// Number of frequency bins produced per snapshot.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn validate(&self) -> Result<()> {
        if self.fft_size < 32 || !self.fft_size.is_power_of_two() {
            return Err(CompositorError::Config(format!(
                "fft size {} must be a power of two of at least 32",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(CompositorError::Config(format!(
                "smoothing {} must lie in [0, 1)",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(CompositorError::Config(
                "min_decibels must be below max_decibels".into(),
            ));
        }
        Ok(())
    }
}

/// Cool/warm tints blended by pointer x and weighted by luminance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeProfile {
    pub cool_highlights: Vec3,
    pub cool_shadows: Vec3,
    pub warm_highlights: Vec3,
    pub warm_shadows: Vec3,
    /// Smoothstep edges mapping pointer x to the cool/warm mix.
    pub temperature_edges: [f32; 2],
    /// Smoothstep edges selecting highlights by luminance.
    pub highlight_edges: [f32; 2],
    /// Smoothstep edges selecting shadows by luminance (descending).
    pub shadow_edges: [f32; 2],
}

impl Default for GradeProfile {
    fn default() -> Self {
        Self::punchy()
    }
}

impl GradeProfile {
    pub fn punchy() -> Self {
        Self {
            cool_highlights: Vec3::new(0.85, 0.95, 1.15),
            cool_shadows: Vec3::new(0.85, 0.95, 1.1),
            warm_highlights: Vec3::new(1.15, 0.95, 0.85),
            warm_shadows: Vec3::new(1.1, 0.95, 0.85),
            temperature_edges: [0.2, 0.8],
            highlight_edges: [0.4, 0.8],
            shadow_edges: [0.6, 0.2],
        }
    }

    pub fn subtle() -> Self {
        Self {
            highlight_edges: [0.4, 0.9],
            shadow_edges: [0.8, 0.2],
            ..Self::punchy()
        }
    }
}

/// Lift/gamma/gain ranges interpolated by pointer y. Each `[a, b]` pair maps
/// a contrast level of 0 to `a` and 1 to `b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContrastProfile {
    /// Power curve applied before lift/gamma/gain, if any.
    pub base_contrast: Option<[f32; 2]>,
    pub lift: [f32; 2],
    pub gamma: [f32; 2],
    pub gain: [f32; 2],
    pub highlight_compress: [f32; 2],
    /// Smoothstep edges selecting the highlights that get rolled off.
    pub highlight_knee: [f32; 2],
    pub saturation: [f32; 2],
    /// Use `1 - pointer.y` as the contrast level.
    pub invert: bool,
}

impl Default for ContrastProfile {
    fn default() -> Self {
        Self::punchy()
    }
}

impl ContrastProfile {
    pub fn punchy() -> Self {
        Self {
            base_contrast: Some([0.6, 1.6]),
            lift: [-0.05, 0.02],
            gamma: [1.1, 0.9],
            gain: [0.95, 1.1],
            highlight_compress: [1.1, 0.9],
            highlight_knee: [0.7, 0.95],
            saturation: [1.1, 0.9],
            invert: false,
        }
    }

    pub fn subtle() -> Self {
        Self {
            base_contrast: None,
            lift: [-0.02, 0.01],
            gamma: [1.02, 0.98],
            gain: [0.98, 1.02],
            highlight_compress: [1.02, 0.98],
            highlight_knee: [0.8, 0.95],
            saturation: [1.02, 0.98],
            invert: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Red/blue offset per unit of effect intensity.
    pub aberration_scale: f32,
    /// Peak amplitude of the old-film grain.
    pub grain_amount: f32,
    /// Radii (from the frame centre, in uv units) where the vignette starts
    /// and reaches full darkness.
    pub vignette_radii: [f32; 2],
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            aberration_scale: 0.01,
            grain_amount: 0.08,
            vignette_radii: [0.35, 0.8],
        }
    }
}

impl EffectConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=MAX_ABERRATION_SCALE).contains(&self.aberration_scale) {
            return Err(CompositorError::Config(format!(
                "aberration scale {} must lie in [0, {MAX_ABERRATION_SCALE}]",
                self.aberration_scale
            )));
        }
        if self.vignette_radii[0] >= self.vignette_radii[1] {
            return Err(CompositorError::Config(
                "vignette inner radius must be below the outer radius".into(),
            ));
        }
        Ok(())
    }
}

/// Which half of the split shows the primary media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitSide {
    #[default]
    Left,
    Right,
}

/// Where the second source for split and blend modes comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondarySource {
    None,
    #[default]
    Camera,
    Display,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    pub divider_position: f32,
    pub primary_side: SplitSide,
    pub secondary: SecondarySource,
    /// Mirror the secondary feed horizontally (selfie view).
    pub mirror_secondary: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Normal,
            divider_position: 50.0,
            primary_side: SplitSide::Left,
            secondary: SecondarySource::Camera,
            mirror_secondary: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Loop videos in place instead of advancing when they end.
    pub video_looping: bool,
    /// Optional cap on rendered frames per second.
    pub max_fps: Option<f32>,
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Option<Duration> {
        self.max_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .and_then(|fps| Duration::try_from_secs_f32(1.0 / fps).ok())
    }
}

/// Smoothstep edge pairs divide by their span; equal edges have none.
fn check_edges(name: &str, edges: [f32; 2]) -> Result<()> {
    let [a, b] = edges;
    if !(a.is_finite() && b.is_finite()) || a == b {
        return Err(CompositorError::Config(format!(
            "{name} needs two distinct finite edges, got [{a}, {b}]"
        )));
    }
    Ok(())
}

fn default_media() -> Vec<MediaDescriptor> {
    [
        "vid/C0008.MP4_Rendered_001.mp4",
        "vid/C0016.MP4_Rendered_001.mp4",
        "vid/C0014.MP4_Rendered_001.mp4",
        "vid/C0022.MP4_Rendered_001.mp4",
    ]
    .into_iter()
    .map(|url| MediaDescriptor::new(url, MediaKind::Video))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_punchy_tuning() {
        let config = AppConfig::default();
        assert_eq!(config.beat.beat_threshold, 0.80);
        assert_eq!(config.beat.chromatic_threshold, 0.80);
        assert_eq!(config.beat.min_interval(), Duration::from_millis(100));
        assert_eq!(config.analyser.bin_count(), 128);
        assert_eq!(config.contrast.lift, [-0.05, 0.02]);
        assert_eq!(config.media.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = AppConfig::from_json(r#"{ "beat": { "min_interval_ms": 250 } }"#).unwrap();
        assert_eq!(config.beat.min_interval_ms, 250);
        assert_eq!(config.beat.bass_bins, 4);
        assert_eq!(config.grade, GradeProfile::punchy());
    }

    #[test]
    fn rejects_excessive_aberration() {
        let err = AppConfig::from_json(r#"{ "effects": { "aberration_scale": 0.2 } }"#)
            .unwrap_err();
        assert!(matches!(err, CompositorError::Config(_)));
    }

    #[test]
    fn json_round_trip_keeps_subtle_preset() {
        let subtle = AppConfig::preset(Preset::Subtle);
        let parsed = AppConfig::from_json(&subtle.to_json().unwrap()).unwrap();
        assert_eq!(parsed, subtle);
        assert!(parsed.contrast.invert);
        assert!(parsed.contrast.base_contrast.is_none());
    }

    #[test]
    fn frame_interval_follows_fps_cap() {
        let pipeline = PipelineConfig {
            max_fps: Some(30.0),
            ..Default::default()
        };
        let interval = pipeline.frame_interval().unwrap();
        assert!((interval.as_secs_f32() - 1.0 / 30.0).abs() < 1e-6);
        assert!(PipelineConfig::default().frame_interval().is_none());
    }

    #[test]
    fn tiny_fps_cap_is_rejected_not_overflowed() {
        let err = AppConfig::from_json(r#"{ "pipeline": { "max_fps": 1e-40 } }"#).unwrap_err();
        assert!(matches!(err, CompositorError::Config(_)));
        assert!(AppConfig::from_json(r#"{ "pipeline": { "max_fps": 0.5 } }"#).is_err());

        let unchecked = PipelineConfig {
            max_fps: Some(1e-40),
            ..Default::default()
        };
        assert!(unchecked.frame_interval().is_none());
    }

    #[test]
    fn equal_smoothstep_edges_are_rejected() {
        for json in [
            r#"{ "grade": { "temperature_edges": [0.5, 0.5] } }"#,
            r#"{ "grade": { "shadow_edges": [0.3, 0.3] } }"#,
            r#"{ "contrast": { "highlight_knee": [0.9, 0.9] } }"#,
        ] {
            let err = AppConfig::from_json(json).unwrap_err();
            assert!(err.to_string().contains("distinct"), "{json}: {err}");
        }
        assert!(AppConfig::preset(Preset::Subtle).validate().is_ok());
    }

    #[test]
    fn parses_preset_names() {
        assert_eq!("Subtle".parse::<Preset>().unwrap(), Preset::Subtle);
        assert!("loud".parse::<Preset>().is_err());
    }
}
