//! Graphics surface capability and the uniform contract written to it.

use glam::{Vec2, Vec3};
use tracing::{debug, error};

use crate::{
    config::SplitSide,
    media::DecodedFrame,
    shading::{ShaderParams, FRAGMENT_SOURCE, VERTEX_SOURCE},
    state::DisplayMode,
    AppConfig, CompositorError, Result,
};

/// Full-surface quad as two triangles in clip space.
pub const QUAD_VERTICES: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [1.0, 1.0],
];

pub const QUAD_VERTEX_COUNT: u32 = QUAD_VERTICES.len() as u32;

/// Texture unit of the primary media.
pub const PRIMARY_TEXTURE_UNIT: u32 = 0;
/// Texture unit of the secondary (capture) feed.
pub const SECONDARY_TEXTURE_UNIT: u32 = 1;

/// Uniform names understood by the compositor program.
pub mod uniforms {
    pub const VIDEO_TEXTURE: &str = "u_videoTexture";
    pub const WEBCAM_TEXTURE: &str = "u_webcamTexture";

    pub const RESOLUTION: &str = "u_resolution";
    pub const MEDIA_SIZE: &str = "u_mediaSize";
    pub const SECONDARY_SIZE: &str = "u_secondarySize";
    pub const FIT_SCALE: &str = "u_fitScale";
    pub const SECONDARY_FIT_SCALE: &str = "u_secondaryFitScale";
    pub const MOUSE: &str = "u_mouse";
    pub const TIME: &str = "u_time";
    pub const CURSOR_SPEED: &str = "u_cursorSpeed";
    pub const AUDIO_FREQ: &str = "u_audioFreq";
    pub const CHROMATIC_STRENGTH: &str = "u_chromaticStrength";
    pub const OLD_FILM: &str = "u_oldFilmEffect";
    pub const DISPLAY_MODE: &str = "u_displayMode";
    pub const DIVIDER_POSITION: &str = "u_dividerPosition";
    pub const PRIMARY_LEFT: &str = "u_primaryLeft";
    pub const MIRROR_SECONDARY: &str = "u_mirrorSecondary";
    pub const HAS_SECONDARY: &str = "u_hasSecondary";

    pub const COOL_HIGHLIGHTS: &str = "u_coolHighlights";
    pub const COOL_SHADOWS: &str = "u_coolShadows";
    pub const WARM_HIGHLIGHTS: &str = "u_warmHighlights";
    pub const WARM_SHADOWS: &str = "u_warmShadows";
    pub const TEMPERATURE_EDGES: &str = "u_temperatureEdges";
    pub const HIGHLIGHT_EDGES: &str = "u_highlightEdges";
    pub const SHADOW_EDGES: &str = "u_shadowEdges";

    pub const USE_BASE_CONTRAST: &str = "u_useBaseContrast";
    pub const BASE_CONTRAST: &str = "u_baseContrast";
    pub const LIFT: &str = "u_lift";
    pub const GAMMA: &str = "u_gamma";
    pub const GAIN: &str = "u_gain";
    pub const HIGHLIGHT_COMPRESS: &str = "u_highlightCompress";
    pub const HIGHLIGHT_KNEE: &str = "u_highlightKnee";
    pub const SATURATION: &str = "u_saturation";
    pub const INVERT_CONTRAST: &str = "u_invertContrast";

    pub const ABERRATION_SCALE: &str = "u_aberrationScale";
    pub const GRAIN_AMOUNT: &str = "u_grainAmount";
    pub const VIGNETTE_RADII: &str = "u_vignetteRadii";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(value: [f32; 2]) -> Self {
        Self::Vec2(Vec2::from(value))
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        Self::Vec3(value)
    }
}

/// Drawable surface plus GPU context. Program compilation, texture storage
/// and the draw itself happen on the other side of this trait.
pub trait GraphicsSurface {
    /// Drawable size in physical pixels.
    fn size(&self) -> Vec2;

    fn create_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramHandle>;

    /// Creates a texture bound to `unit` with clamp-to-edge wrapping and
    /// linear filtering.
    fn create_texture(&mut self, unit: u32) -> Result<TextureHandle>;

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue);

    fn upload_image(&mut self, texture: TextureHandle, frame: &DecodedFrame) -> Result<()>;

    /// Clears to opaque black and draws `vertex_count` vertices of the
    /// fixed quad.
    fn draw(&mut self, program: ProgramHandle, vertex_count: u32) -> Result<()>;
}

/// Handles created once the surface is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuResources {
    pub program: ProgramHandle,
    pub primary_texture: TextureHandle,
    pub secondary_texture: TextureHandle,
}

impl GpuResources {
    /// Compiles the compositor program, creates both textures and writes the
    /// configuration uniforms. Every failure is an initialization error.
    pub fn create(surface: &mut dyn GraphicsSurface, config: &AppConfig) -> Result<Self> {
        let program = surface
            .create_program(VERTEX_SOURCE, FRAGMENT_SOURCE)
            .map_err(into_initialization)?;
        let primary_texture = surface
            .create_texture(PRIMARY_TEXTURE_UNIT)
            .map_err(into_initialization)?;
        let secondary_texture = surface
            .create_texture(SECONDARY_TEXTURE_UNIT)
            .map_err(into_initialization)?;

        let resources = Self {
            program,
            primary_texture,
            secondary_texture,
        };
        surface.set_uniform(program, uniforms::VIDEO_TEXTURE, (PRIMARY_TEXTURE_UNIT as i32).into());
        surface.set_uniform(program, uniforms::WEBCAM_TEXTURE, (SECONDARY_TEXTURE_UNIT as i32).into());
        resources.write_config_uniforms(surface, config);
        debug!(?resources, "graphics resources ready");
        Ok(resources)
    }

    /// Tuning constants. Written at start-up and whenever the config changes.
    pub fn write_config_uniforms(&self, surface: &mut dyn GraphicsSurface, config: &AppConfig) {
        let p = self.program;
        let grade = &config.grade;
        surface.set_uniform(p, uniforms::COOL_HIGHLIGHTS, grade.cool_highlights.into());
        surface.set_uniform(p, uniforms::COOL_SHADOWS, grade.cool_shadows.into());
        surface.set_uniform(p, uniforms::WARM_HIGHLIGHTS, grade.warm_highlights.into());
        surface.set_uniform(p, uniforms::WARM_SHADOWS, grade.warm_shadows.into());
        surface.set_uniform(p, uniforms::TEMPERATURE_EDGES, grade.temperature_edges.into());
        surface.set_uniform(p, uniforms::HIGHLIGHT_EDGES, grade.highlight_edges.into());
        surface.set_uniform(p, uniforms::SHADOW_EDGES, grade.shadow_edges.into());

        let contrast = &config.contrast;
        surface.set_uniform(p, uniforms::USE_BASE_CONTRAST, contrast.base_contrast.is_some().into());
        surface.set_uniform(
            p,
            uniforms::BASE_CONTRAST,
            contrast.base_contrast.unwrap_or([1.0, 1.0]).into(),
        );
        surface.set_uniform(p, uniforms::LIFT, contrast.lift.into());
        surface.set_uniform(p, uniforms::GAMMA, contrast.gamma.into());
        surface.set_uniform(p, uniforms::GAIN, contrast.gain.into());
        surface.set_uniform(p, uniforms::HIGHLIGHT_COMPRESS, contrast.highlight_compress.into());
        surface.set_uniform(p, uniforms::HIGHLIGHT_KNEE, contrast.highlight_knee.into());
        surface.set_uniform(p, uniforms::SATURATION, contrast.saturation.into());
        surface.set_uniform(p, uniforms::INVERT_CONTRAST, contrast.invert.into());

        let effects = &config.effects;
        surface.set_uniform(p, uniforms::ABERRATION_SCALE, effects.aberration_scale.into());
        surface.set_uniform(p, uniforms::GRAIN_AMOUNT, effects.grain_amount.into());
        surface.set_uniform(p, uniforms::VIGNETTE_RADII, effects.vignette_radii.into());
    }

    /// Resolution, media sizes and the derived fit scales.
    pub fn write_fit_uniforms(&self, surface: &mut dyn GraphicsSurface, params: &ShaderParams) {
        let p = self.program;
        surface.set_uniform(p, uniforms::RESOLUTION, params.resolution.into());
        surface.set_uniform(p, uniforms::MEDIA_SIZE, params.media_size.into());
        surface.set_uniform(p, uniforms::SECONDARY_SIZE, params.secondary_size.into());
        surface.set_uniform(p, uniforms::FIT_SCALE, params.primary_scale.into());
        surface.set_uniform(p, uniforms::SECONDARY_FIT_SCALE, params.secondary_scale.into());
    }

    pub fn write_frame_uniforms(
        &self,
        surface: &mut dyn GraphicsSurface,
        params: &ShaderParams,
        has_secondary: bool,
    ) {
        self.write_fit_uniforms(surface, params);

        let p = self.program;
        surface.set_uniform(p, uniforms::MOUSE, params.pointer.into());
        surface.set_uniform(p, uniforms::TIME, params.time.into());
        surface.set_uniform(p, uniforms::CURSOR_SPEED, params.cursor_speed.into());
        surface.set_uniform(p, uniforms::AUDIO_FREQ, params.beat_strength.into());
        surface.set_uniform(p, uniforms::CHROMATIC_STRENGTH, params.effect_intensity.into());
        surface.set_uniform(p, uniforms::OLD_FILM, params.old_film.into());
        surface.set_uniform(p, uniforms::DISPLAY_MODE, display_mode_code(params.mode).into());
        surface.set_uniform(p, uniforms::DIVIDER_POSITION, params.divider.into());
        surface.set_uniform(
            p,
            uniforms::PRIMARY_LEFT,
            (params.primary_side == SplitSide::Left).into(),
        );
        surface.set_uniform(p, uniforms::MIRROR_SECONDARY, params.mirror_secondary.into());
        surface.set_uniform(p, uniforms::HAS_SECONDARY, has_secondary.into());
    }
}

/// Integer code of a display mode in `u_displayMode`.
pub fn display_mode_code(mode: DisplayMode) -> i32 {
    match mode {
        DisplayMode::Normal => 0,
        DisplayMode::Split => 1,
        DisplayMode::Blend => 2,
    }
}

fn into_initialization(err: CompositorError) -> CompositorError {
    match err {
        CompositorError::Initialization(_) => err,
        other => {
            error!(%other, "graphics setup failed");
            CompositorError::Initialization(other.to_string())
        }
    }
}
