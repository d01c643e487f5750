use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use cutline_core::{
    BuiltinClipFactory, EngineConfig, FrameSpan, SurfaceCommand, Timeline,
    diagnostics::init_tracing,
    fingerprint::write_fingerprint_report,
    fixtures::demo_timeline_with_options,
    persistence::{load_timeline, save_timeline},
    record_frame, render_fingerprint,
};

#[derive(Debug, Parser)]
#[command(name = "cutline-cli")]
#[command(about = "Headless tools for Cutline timeline save/render/fingerprint workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Config file to use instead of the discovered `cutline.config.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    DemoSave {
        #[arg(long, default_value = "data/timelines/demo.cutline.json")]
        output: PathBuf,
    },
    /// Composites a frame range and logs what each frame drew.
    Render {
        /// Timeline document to load. The demo timeline is used when omitted.
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        from: i64,

        #[arg(long, default_value_t = 240)]
        to: i64,
    },
    Fingerprint {
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        from: i64,

        #[arg(long, default_value_t = 240)]
        to: i64,

        #[arg(long, default_value = "data/fingerprints/report.json")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load_or_default()?,
    };
    if let Some(log_dir) = cli.log_dir.clone() {
        config.diagnostics.log_dir = log_dir;
    }
    let _telemetry = init_tracing(&config.diagnostics)?;

    match cli.command {
        Commands::DemoSave { output } => {
            let timeline = demo_timeline_with_options(config.timeline_options());
            save_timeline(&output, &timeline)?;
            tracing::info!(path = %output.display(), "demo timeline saved");
        }
        Commands::Render { input, from, to } => {
            let mut timeline = open_timeline(input.as_deref(), &config)?;
            let frame_size = config.frame_size();
            for frame in from..to {
                let commands = record_frame(&mut timeline, frame, frame_size)
                    .with_context(|| format!("failed to render frame {frame}"))?;
                let layers = commands
                    .iter()
                    .filter(|command| matches!(command, SurfaceCommand::SaveLayer { .. }))
                    .count();
                let fills = commands
                    .iter()
                    .filter(|command| matches!(command, SurfaceCommand::Fill { .. }))
                    .count();
                tracing::info!(
                    frame,
                    commands = commands.len(),
                    layers,
                    fills,
                    elapsed_us = timeline
                        .last_render_duration()
                        .map_or(0, |elapsed| elapsed.as_micros()),
                    "frame rendered"
                );
            }
        }
        Commands::Fingerprint {
            input,
            from,
            to,
            output,
        } => {
            let mut timeline = open_timeline(input.as_deref(), &config)?;
            let report = render_fingerprint(
                &mut timeline,
                FrameSpan::from_index(from, to.max(from)),
                config.frame_size(),
            )?;
            write_fingerprint_report(&output, &report)?;
            tracing::info!(
                path = %output.display(),
                render_hash = %report.render_hash,
                "fingerprint report generated"
            );
        }
    }

    Ok(())
}

fn open_timeline(input: Option<&Path>, config: &EngineConfig) -> anyhow::Result<Timeline> {
    match input {
        Some(path) => load_timeline(path, &BuiltinClipFactory, config.timeline_options()),
        None => Ok(demo_timeline_with_options(config.timeline_options())),
    }
}
