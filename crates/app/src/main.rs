use std::{cell::Cell, path::PathBuf, rc::Rc, time::Duration};

use clap::{Parser, Subcommand};
use glam::Vec2;
use reactive_compositor_core::{
    aspect_fit, AppConfig, CompositorContext, FrameScheduler, Preset, TickOutcome,
};
use tracing_subscriber::EnvFilter;

mod headless;

use headless::{LoggingSurface, SyntheticKick, TimedDecoder};

fn main() -> reactive_compositor_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => run_simulation(args),
        Commands::Fit {
            width,
            height,
            media_width,
            media_height,
        } => {
            let scale = aspect_fit(Vec2::new(width, height), Vec2::new(media_width, media_height));
            println!("{}", serde_json::json!({ "scale": [scale.x, scale.y] }));
            Ok(())
        }
        Commands::Config { preset } => {
            println!("{}", AppConfig::preset(preset).to_json()?);
            Ok(())
        }
    }
}

fn run_simulation(args: SimulateArgs) -> reactive_compositor_core::Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::preset(args.preset),
    };
    let frame = Duration::from_secs_f32(1.0 / args.fps.max(1.0));
    tracing::info!(frames = args.frames, bpm = args.bpm, ?frame, "starting headless simulation");

    let clock = Rc::new(Cell::new(Duration::ZERO));
    let kick = SyntheticKick::new(config.analyser.clone(), args.bpm, frame)?;
    let decoder = TimedDecoder::new(
        clock.clone(),
        Duration::from_millis(args.load_delay_ms),
        Duration::from_secs_f32(args.video_seconds),
        kick,
    );

    let frame_interval = config.pipeline.frame_interval();
    let mut ctx = CompositorContext::new(config, Box::new(decoder))?;
    let mut surface = LoggingSurface::new(args.width, args.height);
    ctx.initialize_graphics(&mut surface)?;
    ctx.start()?;

    let mut last_index = ctx.state().media.active_index;
    ctx.subscribe(move |state, _| {
        if state.media.active_index != last_index {
            tracing::info!(from = last_index, to = state.media.active_index, "media switched");
            last_index = state.media.active_index;
        }
    });

    let mut scheduler = FrameScheduler::new(frame_interval);
    let mut ticks = 0u64;
    for n in 0..args.frames {
        let now = frame * n;
        clock.set(now);
        ticks += 1;
        if scheduler.tick(&mut ctx, &mut surface, now) == TickOutcome::Stopped {
            tracing::error!("render loop stopped");
            break;
        }
    }

    let stats = scheduler.stats();
    let beat = ctx.state().beat;
    let released = ctx.shutdown();

    let summary = serde_json::json!({
        "ticks": ticks,
        "rendered": stats.rendered,
        "skipped": stats.skipped,
        "beat_advances": stats.advances,
        "upload_failures": stats.upload_failures,
        "draws": surface.draws,
        "uploads": surface.uploads,
        "uniforms_written": surface.uniforms.len(),
        "final_index": ctx.pipeline().active_index(),
        "beat": beat,
        "released_urls": released,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-reactive media compositor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the full pipeline headlessly with a synthetic kick drum.
    Simulate(SimulateArgs),
    /// Print the aspect-fit scale for a surface and media size.
    Fit {
        width: f32,
        height: f32,
        media_width: f32,
        media_height: f32,
    },
    /// Print a preset configuration as JSON.
    Config {
        #[arg(default_value = "punchy")]
        preset: Preset,
    },
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    /// Configuration file to load instead of a preset.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, default_value = "punchy")]
    preset: Preset,
    #[arg(long, default_value_t = 600)]
    frames: u32,
    #[arg(long, default_value_t = 60.0)]
    fps: f32,
    #[arg(long, default_value_t = 120.0)]
    bpm: f32,
    #[arg(long, default_value_t = 1920.0)]
    width: f32,
    #[arg(long, default_value_t = 1080.0)]
    height: f32,
    /// Time each source takes to become ready.
    #[arg(long, default_value_t = 50)]
    load_delay_ms: u64,
    /// Length of every simulated video.
    #[arg(long, default_value_t = 4.0)]
    video_seconds: f32,
}
