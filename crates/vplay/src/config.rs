use std::path::{Path, PathBuf};

use anyhow::Result;
use video_player::config::PlayerConfig;
use video_player::source::SourceDescriptor;

use crate::cli::PlayArgs;

/// Everything `run_play` needs, resolved from arguments and the config file.
#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub source: SourceDescriptor,
    pub speed: f32,
    pub start_frame: Option<i64>,
    pub audio: Option<PathBuf>,
    pub device: Option<String>,
    pub snapshot: Option<PathBuf>,
    pub player: PlayerConfig,
}

/// Load tuning values from `path`, or defaults when no file is given.
pub fn load_player_config(path: Option<&Path>) -> Result<PlayerConfig> {
    match path {
        Some(path) => {
            let config = PlayerConfig::load(path)?;
            tracing::info!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => Ok(PlayerConfig::default()),
    }
}

impl PlayConfig {
    pub fn from_args(args: PlayArgs, player: PlayerConfig) -> Self {
        let source = match (args.live, args.width, args.height) {
            (false, Some(width), Some(height)) => SourceDescriptor::Precomputed {
                path: args.path,
                width,
                height,
                frame_rate: args.fps,
            },
            _ => SourceDescriptor::live(args.path),
        };
        Self {
            source,
            speed: args.speed,
            start_frame: args.start_frame,
            audio: args.audio,
            device: normalize_device_name(args.device),
            snapshot: args.snapshot,
            player,
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
