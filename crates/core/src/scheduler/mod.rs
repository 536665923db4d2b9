use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    context::{CompositorContext, GraphicsStatus},
    render::{GraphicsSurface, QUAD_VERTEX_COUNT},
    shading::ShaderParams,
};

/// Seconds since the first rendered tick, fed to `u_time`.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    origin: Option<Duration>,
    pub time_seconds: f32,
}

impl FrameClock {
    pub fn reset(&mut self) {
        self.origin = None;
        self.time_seconds = 0.0;
    }

    pub fn advance_to(&mut self, now: Duration) {
        let origin = *self.origin.get_or_insert(now);
        self.time_seconds = now.saturating_sub(origin).as_secs_f32();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Surface, program or textures do not exist yet.
    Uninitialized,
    /// Too soon after the previous frame under the frame-rate cap.
    Throttled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Rendered,
    Skipped(SkipReason),
    /// The visual pipeline failed to initialize; no further ticks.
    Stopped,
}

impl TickOutcome {
    /// Whether the host should request another frame callback.
    pub fn reschedule(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub rendered: u64,
    pub skipped: u64,
    pub advances: u64,
    pub upload_failures: u64,
    pub draw_failures: u64,
}

/// Drives one frame per display callback.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    clock: FrameClock,
    frame_interval: Option<Duration>,
    last_render: Option<Duration>,
    stats: FrameStats,
}

impl FrameScheduler {
    pub fn new(frame_interval: Option<Duration>) -> Self {
        Self {
            frame_interval,
            ..Self::default()
        }
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Runs one frame at `now` (time since the session started).
    ///
    /// Within a tick, audio sampling precedes the beat update, which precedes
    /// the swap decision, which precedes upload and draw. Per-frame failures
    /// are logged and the frame carries on.
    pub fn tick(
        &mut self,
        ctx: &mut CompositorContext,
        surface: &mut dyn GraphicsSurface,
        now: Duration,
    ) -> TickOutcome {
        let resources = match ctx.graphics() {
            GraphicsStatus::Failed => return TickOutcome::Stopped,
            GraphicsStatus::Uninitialized => {
                self.stats.skipped += 1;
                return TickOutcome::Skipped(SkipReason::Uninitialized);
            }
            GraphicsStatus::Ready(resources) => resources,
        };

        if self.throttled(now) {
            self.stats.skipped += 1;
            return TickOutcome::Skipped(SkipReason::Throttled);
        }
        self.last_render = Some(now);
        self.clock.advance_to(now);

        ctx.pump_media();

        let reading = ctx.sample_beat(now);
        if reading.advance {
            match ctx.advance() {
                Ok(ticket) => {
                    self.stats.advances += 1;
                    debug!(index = ticket.index, strength = reading.beat_strength, "beat advanced media");
                }
                Err(err) => warn!(%err, "beat advance failed"),
            }
        }

        if let Some(frame) = ctx.take_primary_frame() {
            if let Err(err) = surface.upload_image(resources.primary_texture, &frame) {
                self.stats.upload_failures += 1;
                warn!(%err, "primary upload failed; keeping previous texture");
            }
        }
        if let Some(frame) = ctx.take_secondary_frame() {
            if let Err(err) = surface.upload_image(resources.secondary_texture, &frame) {
                self.stats.upload_failures += 1;
                warn!(%err, "secondary upload failed; keeping previous texture");
            }
        }

        let params = ShaderParams::from_state(ctx.state(), ctx.config(), self.clock.time_seconds);
        resources.write_frame_uniforms(surface, &params, ctx.has_secondary());

        if let Err(err) = surface.draw(resources.program, QUAD_VERTEX_COUNT) {
            self.stats.draw_failures += 1;
            warn!(%err, "draw failed");
        }
        self.stats.rendered += 1;
        TickOutcome::Rendered
    }

    fn throttled(&self, now: Duration) -> bool {
        match (self.frame_interval, self.last_render) {
            (Some(interval), Some(last)) => now.saturating_sub(last) < interval,
            _ => false,
        }
    }
}
