use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ", ",
    env!("VPLAY_BACKENDS"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "vplay", version = VERSION, about = "Play raw or containerised video with optional audio")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List audio output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// TOML file with player tuning values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a video file; commands are read from stdin
    Play(PlayArgs),

    /// Decode a container into a headerless raw frame file (.y4m, or any format with the ffmpeg feature)
    Extract {
        input: PathBuf,
        output: PathBuf,
    },

    /// Print the number of frames in a raw frame file
    Frames {
        path: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlayArgs {
    /// Raw 4:2:0 frame file, or a container with --live
    pub path: PathBuf,

    /// Frame width of a raw file
    #[arg(long, required_unless_present = "live")]
    pub width: Option<u32>,

    /// Frame height of a raw file
    #[arg(long, required_unless_present = "live")]
    pub height: Option<u32>,

    /// Read the file as a container through the extract/decode stages
    #[arg(long, conflicts_with_all = ["width", "height"])]
    pub live: bool,

    /// Frame rate of a raw file (defaults to the configured rate)
    #[arg(long)]
    pub fps: Option<f64>,

    /// Initial playback speed
    #[arg(long, default_value_t = 1.0)]
    pub speed: f32,

    /// Frame to start from
    #[arg(long)]
    pub start_frame: Option<i64>,

    /// Audio file played alongside the video
    #[arg(long)]
    pub audio: Option<PathBuf>,

    /// Audio output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Write the last presented frame as a PPM image on exit
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}
