//! Parameter contract of the shader stage.
//!
//! The GPU program (see `compositor.frag`) is compiled by the graphics
//! surface; this module holds the same math on the CPU so the per-frame
//! parameters, the aspect-fit rule and the colour pipeline can be checked
//! without a GPU. Stage order per source is fixed: colour grade, contrast,
//! chromatic aberration, old film. Compositing happens afterwards.

use glam::{Vec2, Vec3};

use crate::{
    config::{ContrastProfile, EffectConfig, GradeProfile, SplitSide},
    state::{CompositorState, DisplayMode},
    AppConfig,
};

pub const VERTEX_SOURCE: &str = include_str!("compositor.vert");
pub const FRAGMENT_SOURCE: &str = include_str!("compositor.frag");

const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Scale that fits media of `media` pixels into a surface of `resolution`
/// pixels without stretching. The axis with spare room gets a scale below 1.
/// Degenerate sizes fall back to `(1, 1)`.
pub fn aspect_fit(resolution: Vec2, media: Vec2) -> Vec2 {
    let usable = |size: Vec2| size.is_finite() && size.min_element() > 0.0;
    if !usable(resolution) || !usable(media) {
        return Vec2::ONE;
    }

    let screen_aspect = resolution.x / resolution.y;
    let media_aspect = media.x / media.y;
    if screen_aspect > media_aspect {
        Vec2::new(media_aspect / screen_aspect, 1.0)
    } else {
        Vec2::new(1.0, screen_aspect / media_aspect)
    }
}

/// Recentres a surface texture coordinate into media space.
pub fn fit_uv(uv: Vec2, scale: Vec2) -> Vec2 {
    (uv - 0.5) / scale + 0.5
}

/// Media-space coordinates outside the unit square belong to the letterbox.
pub fn uv_in_bounds(uv: Vec2) -> bool {
    (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y)
}

pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMA)
}

/// GLSL `smoothstep`, including descending edges (`edge0 > edge1`).
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn mix(range: [f32; 2], t: f32) -> f32 {
    range[0] + (range[1] - range[0]) * t
}

fn mix3(a: Vec3, b: Vec3, t: Vec3) -> Vec3 {
    a + (b - a) * t
}

/// Tints highlights and shadows between the cool and warm triples.
pub fn color_grade(color: Vec3, temperature: f32, profile: &GradeProfile) -> Vec3 {
    let [t0, t1] = profile.temperature_edges;
    let warmth = smoothstep(t0, t1, temperature);
    let highlights = profile.cool_highlights.lerp(profile.warm_highlights, warmth);
    let shadows = profile.cool_shadows.lerp(profile.warm_shadows, warmth);

    let luma = luminance(color);
    let [h0, h1] = profile.highlight_edges;
    let [s0, s1] = profile.shadow_edges;
    let highlight_adjust = Vec3::ONE.lerp(highlights, smoothstep(h0, h1, luma));
    let shadow_adjust = Vec3::ONE.lerp(shadows, smoothstep(s0, s1, luma));

    color * highlight_adjust * shadow_adjust
}

/// Lift/gamma/gain with highlight roll-off and saturation compensation.
pub fn contrast(color: Vec3, level: f32, profile: &ContrastProfile) -> Vec3 {
    let level = if profile.invert { 1.0 - level } else { level };
    let mut color = color.max(Vec3::ZERO);

    if let Some(base) = profile.base_contrast {
        color = color.powf(mix(base, level));
    }

    let lift = mix(profile.lift, level);
    let gamma = mix(profile.gamma, level);
    let gain = mix(profile.gain, level);
    color = (color + lift).max(Vec3::ZERO).powf(1.0 / gamma) * gain;

    let compress = mix(profile.highlight_compress, level);
    let [k0, k1] = profile.highlight_knee;
    let highlights = Vec3::new(
        smoothstep(k0, k1, color.x),
        smoothstep(k0, k1, color.y),
        smoothstep(k0, k1, color.z),
    );
    color = mix3(color, color.powf(compress), highlights);

    let saturation = mix(profile.saturation, level);
    let desaturated = Vec3::splat(luminance(color));
    desaturated.lerp(color, saturation)
}

/// Desaturates, adds grain seeded by position and time, then vignettes.
pub fn old_film(color: Vec3, screen_uv: Vec2, time: f32, effects: &EffectConfig) -> Vec3 {
    let gray = Vec3::splat(luminance(color));
    let grain = (grain_noise(screen_uv, time) - 0.5) * effects.grain_amount;
    let [inner, outer] = effects.vignette_radii;
    let vignette = 1.0 - smoothstep(inner, outer, (screen_uv - 0.5).length());
    (gray + Vec3::splat(grain)) * vignette
}

fn grain_noise(uv: Vec2, time: f32) -> f32 {
    let seed = uv.dot(Vec2::new(12.9898, 78.233)) + time;
    (seed.sin() * 43758.5453).rem_euclid(1.0)
}

/// Source of texels for the reference pipeline. Implementations clamp
/// out-of-range coordinates to the edge, like the GPU textures do.
pub trait TextureSampler {
    fn sample(&self, uv: Vec2) -> Vec3;
}

impl<F: Fn(Vec2) -> Vec3> TextureSampler for F {
    fn sample(&self, uv: Vec2) -> Vec3 {
        self(uv)
    }
}

/// Everything the shader stage needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderParams {
    pub resolution: Vec2,
    pub media_size: Vec2,
    pub secondary_size: Vec2,
    pub primary_scale: Vec2,
    pub secondary_scale: Vec2,
    /// Normalised pointer, `x` drives temperature and `y` contrast.
    pub pointer: Vec2,
    pub cursor_speed: f32,
    pub time: f32,
    pub beat_strength: f32,
    pub effect_intensity: f32,
    pub old_film: bool,
    pub mode: DisplayMode,
    /// Divider as a fraction of the surface width.
    pub divider: f32,
    pub primary_side: SplitSide,
    pub mirror_secondary: bool,
}

impl ShaderParams {
    pub fn from_state(state: &CompositorState, config: &AppConfig, time: f32) -> Self {
        let media_size = state
            .media
            .intrinsic_size
            .map(|size| size.as_vec2())
            .unwrap_or(Vec2::ZERO);
        let secondary_size = state
            .secondary_size
            .map(|size| size.as_vec2())
            .unwrap_or(Vec2::ZERO);

        Self {
            resolution: state.resolution,
            media_size,
            secondary_size,
            primary_scale: aspect_fit(state.resolution, media_size),
            secondary_scale: aspect_fit(state.resolution, secondary_size),
            pointer: Vec2::new(state.pointer.x, state.pointer.y),
            cursor_speed: state.pointer.velocity,
            time,
            beat_strength: state.beat.beat_strength,
            effect_intensity: state.beat.effect_intensity,
            old_film: state.old_film,
            mode: state.display_mode,
            divider: state.divider_position / 100.0,
            primary_side: config.display.primary_side,
            mirror_secondary: config.display.mirror_secondary,
        }
    }
}

/// Result of shading one fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment {
    Color(Vec3),
    /// Nothing is written; the cleared background shows through.
    Discard,
}

/// Reference implementation of the fragment stage.
#[derive(Debug, Clone)]
pub struct ShaderStage<'a> {
    pub grade: &'a GradeProfile,
    pub contrast: &'a ContrastProfile,
    pub effects: &'a EffectConfig,
}

impl<'a> ShaderStage<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self {
            grade: &config.grade,
            contrast: &config.contrast,
            effects: &config.effects,
        }
    }

    /// Shades the fragment at `screen_uv` (origin top-left, unit square).
    ///
    /// Letterboxed fragments are opaque black in normal and blend mode and
    /// discarded in split mode.
    pub fn shade(
        &self,
        params: &ShaderParams,
        screen_uv: Vec2,
        primary: &dyn TextureSampler,
        secondary: Option<&dyn TextureSampler>,
    ) -> Fragment {
        let primary_uv = fit_uv(screen_uv, params.primary_scale);
        let secondary_uv = {
            let uv = fit_uv(screen_uv, params.secondary_scale);
            if params.mirror_secondary {
                Vec2::new(1.0 - uv.x, uv.y)
            } else {
                uv
            }
        };

        match params.mode {
            DisplayMode::Normal => Fragment::Color(
                self.source_color(params, primary, primary_uv, screen_uv)
                    .unwrap_or(Vec3::ZERO),
            ),
            DisplayMode::Split => {
                let primary_side = match params.primary_side {
                    SplitSide::Left => screen_uv.x < params.divider,
                    SplitSide::Right => screen_uv.x >= params.divider,
                };
                let color = if primary_side {
                    self.source_color(params, primary, primary_uv, screen_uv)
                } else {
                    secondary.and_then(|s| self.source_color(params, s, secondary_uv, screen_uv))
                };
                color.map(Fragment::Color).unwrap_or(Fragment::Discard)
            }
            DisplayMode::Blend => {
                let a = self
                    .source_color(params, primary, primary_uv, screen_uv)
                    .unwrap_or(Vec3::ZERO);
                let b = secondary
                    .and_then(|s| self.source_color(params, s, secondary_uv, screen_uv))
                    .unwrap_or(Vec3::ZERO);
                Fragment::Color(a.lerp(b, 0.5))
            }
        }
    }

    fn source_color(
        &self,
        params: &ShaderParams,
        sampler: &dyn TextureSampler,
        uv: Vec2,
        screen_uv: Vec2,
    ) -> Option<Vec3> {
        if !uv_in_bounds(uv) {
            return None;
        }

        let graded = |uv: Vec2| {
            let color = color_grade(sampler.sample(uv), params.pointer.x, self.grade);
            contrast(color, params.pointer.y, self.contrast)
        };

        let offset = Vec2::new(params.effect_intensity * self.effects.aberration_scale, 0.0);
        let mut color = if offset.x > 0.0 {
            Vec3::new(graded(uv + offset).x, graded(uv).y, graded(uv - offset).z)
        } else {
            graded(uv)
        };

        if params.old_film {
            color = old_film(color, screen_uv, params.time, self.effects);
        }
        Some(color.clamp(Vec3::ZERO, Vec3::ONE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Preset, media::MediaSize};

    fn approx(a: Vec2, b: Vec2) -> bool {
        (a - b).abs().max_element() < 1e-3
    }

    fn params(mode: DisplayMode, resolution: Vec2, media: Vec2) -> ShaderParams {
        ShaderParams {
            resolution,
            media_size: media,
            secondary_size: media,
            primary_scale: aspect_fit(resolution, media),
            secondary_scale: aspect_fit(resolution, media),
            pointer: Vec2::splat(0.5),
            cursor_speed: 0.0,
            time: 0.0,
            beat_strength: 0.0,
            effect_intensity: 0.0,
            old_film: false,
            mode,
            divider: 0.5,
            primary_side: SplitSide::Left,
            mirror_secondary: false,
        }
    }

    #[test]
    fn same_aspect_needs_no_scaling() {
        let scale = aspect_fit(Vec2::new(1920.0, 1080.0), Vec2::new(3840.0, 2160.0));
        assert!(approx(scale, Vec2::ONE));
    }

    #[test]
    fn portrait_media_fits_to_height() {
        let scale = aspect_fit(Vec2::new(1920.0, 1080.0), Vec2::new(1080.0, 1920.0));
        assert!(approx(scale, Vec2::new(0.316, 1.0)));
    }

    #[test]
    fn wide_media_fits_to_width() {
        let scale = aspect_fit(Vec2::new(1080.0, 1080.0), Vec2::new(1920.0, 1080.0));
        assert!(approx(scale, Vec2::new(1.0, 0.5625)));
    }

    #[test]
    fn degenerate_sizes_fall_back_to_identity() {
        assert_eq!(aspect_fit(Vec2::new(1920.0, 0.0), Vec2::new(10.0, 10.0)), Vec2::ONE);
        assert_eq!(aspect_fit(Vec2::new(1920.0, 1080.0), Vec2::ZERO), Vec2::ONE);
    }

    #[test]
    fn letterbox_is_black_in_normal_mode() {
        let config = AppConfig::default();
        let stage = ShaderStage::new(&config);
        let p = params(DisplayMode::Normal, Vec2::new(1920.0, 1080.0), Vec2::new(1080.0, 1920.0));
        let white = |_: Vec2| Vec3::ONE;

        assert_eq!(stage.shade(&p, Vec2::new(0.05, 0.5), &white, None), Fragment::Color(Vec3::ZERO));
        match stage.shade(&p, Vec2::new(0.5, 0.5), &white, None) {
            Fragment::Color(c) => assert!(c.min_element() > 0.5),
            Fragment::Discard => panic!("centre must be drawn"),
        }
    }

    #[test]
    fn split_is_a_hard_cut_at_the_divider() {
        let config = AppConfig::default();
        let stage = ShaderStage::new(&config);
        let mut p = params(DisplayMode::Split, Vec2::new(100.0, 100.0), Vec2::new(100.0, 100.0));
        p.divider = 0.3;
        let red = |_: Vec2| Vec3::new(0.5, 0.0, 0.0);
        let blue = |_: Vec2| Vec3::new(0.0, 0.0, 0.5);

        let left = stage.shade(&p, Vec2::new(0.29, 0.5), &red, Some(&blue));
        let right = stage.shade(&p, Vec2::new(0.31, 0.5), &red, Some(&blue));
        match (left, right) {
            (Fragment::Color(l), Fragment::Color(r)) => {
                assert!(l.x > 0.2 && l.z < 0.01);
                assert!(r.z > 0.2 && r.x < 0.01);
            }
            other => panic!("unexpected fragments {other:?}"),
        }

        assert_eq!(stage.shade(&p, Vec2::new(0.9, 0.5), &red, None), Fragment::Discard);
    }

    #[test]
    fn blend_mixes_sources_evenly() {
        let config = AppConfig::preset(Preset::Subtle);
        let stage = ShaderStage::new(&config);
        let p = params(DisplayMode::Blend, Vec2::new(100.0, 100.0), Vec2::new(100.0, 100.0));
        let grey = |_: Vec2| Vec3::splat(0.5);

        let both = stage.shade(&p, Vec2::splat(0.5), &grey, Some(&grey));
        let one = stage.shade(&p, Vec2::splat(0.5), &grey, None);
        match (both, one) {
            (Fragment::Color(both), Fragment::Color(one)) => {
                assert!((both - one * 2.0).abs().max_element() < 1e-5);
            }
            other => panic!("unexpected fragments {other:?}"),
        }
    }

    #[test]
    fn aberration_shifts_red_and_blue_only() {
        let config = AppConfig::default();
        let stage = ShaderStage::new(&config);
        let mut p = params(DisplayMode::Normal, Vec2::new(100.0, 100.0), Vec2::new(100.0, 100.0));
        p.effect_intensity = 1.0;
        // Bright only to the right of the sample point.
        let edge = |uv: Vec2| if uv.x > 0.5 { Vec3::splat(0.8) } else { Vec3::splat(0.1) };

        let dark = |_: Vec2| Vec3::splat(0.1);

        let Fragment::Color(color) = stage.shade(&p, Vec2::new(0.495, 0.5), &edge, None) else {
            panic!("expected colour");
        };
        let Fragment::Color(reference) = stage.shade(&p, Vec2::new(0.495, 0.5), &dark, None) else {
            panic!("expected colour");
        };
        assert!(color.x > reference.x + 0.3);
        assert!((color.y - reference.y).abs() < 1e-6);
        assert!((color.z - reference.z).abs() < 1e-6);
    }

    #[test]
    fn grade_warms_with_pointer_x() {
        let profile = GradeProfile::punchy();
        let highlight = Vec3::splat(0.9);
        let warm = color_grade(highlight, 1.0, &profile);
        let cool = color_grade(highlight, 0.0, &profile);
        assert!(warm.x > warm.z);
        assert!(cool.z > cool.x);
    }

    #[test]
    fn contrast_keeps_black_black_and_stays_finite() {
        let profile = ContrastProfile::punchy();
        for level in [0.0, 0.5, 1.0] {
            let out = contrast(Vec3::ZERO, level, &profile);
            assert!(out.is_finite());
            assert!(out.max_element() < 0.05);
        }
    }

    #[test]
    fn old_film_is_grey_and_vignetted() {
        let effects = EffectConfig::default();
        let centre = old_film(Vec3::new(0.8, 0.2, 0.2), Vec2::splat(0.5), 1.0, &effects);
        let corner = old_film(Vec3::new(0.8, 0.2, 0.2), Vec2::ZERO, 1.0, &effects);
        assert!((centre.x - centre.y).abs() < 1e-6);
        assert!(corner.max_element() < centre.max_element());
    }

    #[test]
    fn params_follow_state() {
        let mut state = CompositorState::default();
        state.resolution = Vec2::new(1920.0, 1080.0);
        state.media.intrinsic_size = Some(MediaSize::new(1080, 1920));
        state.divider_position = 25.0;
        let p = ShaderParams::from_state(&state, &AppConfig::default(), 2.0);
        assert!(approx(p.primary_scale, Vec2::new(0.316, 1.0)));
        assert_eq!(p.secondary_scale, Vec2::ONE);
        assert_eq!(p.divider, 0.25);
        assert_eq!(p.time, 2.0);
    }
}
