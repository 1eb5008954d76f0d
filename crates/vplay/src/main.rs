//! vplay: plays raw 4:2:0 frame files or YUV4MPEG2 clips (any FFmpeg-readable file with
//! the `ffmpeg` feature) with optional audio.
//!
//! ## Pipeline
//! 1. **Source**: a raw file read frame by frame, or a container whose units are
//!    extracted on one thread and decoded on another.
//! 2. **Render**: frames are converted to RGBA, paced to the frame rate and speed,
//!    and presented to an in-memory surface.
//! 3. **Audio**: an optional file decoded with Symphonia and played through CPAL,
//!    following the same pause, speed and seek commands.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vplay::cli::{Args, Command};
use vplay::config::{PlayConfig, load_player_config};
use vplay::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,video_player=info,vplay=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match args.cmd {
        Some(Command::Play(play)) => {
            let player = load_player_config(args.config.as_deref())?;
            runtime::run_play(PlayConfig::from_args(play, player))
        }
        Some(Command::Extract { input, output }) => runtime::run_extract(&input, &output),
        Some(Command::Frames {
            path,
            width,
            height,
        }) => runtime::run_frames(&path, width, height),
        None => {
            tracing::warn!("nothing to do; see --help");
            Ok(())
        }
    }
}
