//! Player tuning parameters shared by the frame sources, render stage and audio controller.
//!
//! Every field has a default, so a TOML file only needs to name what it overrides:
//!
//! ```toml
//! render_pause_poll_ms = 50
//!
//! [audio]
//! sample_rate = 48000
//! format = "f32"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::SampleFormat;

/// Playback tuning parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Sleep between pause re-checks in the precomputed render loop.
    pub render_pause_poll_ms: u64,
    /// Sleep between pause re-checks in the live decode loop.
    pub decode_pause_poll_ms: u64,
    /// Frame rate assumed until a source exposes its own.
    pub default_frame_rate: f64,
    /// Units the live extraction stage may run ahead of the decoder.
    pub live_queue_depth: usize,
    /// Audio output settings.
    pub audio: AudioSettings,
}

/// Audio device settings used when (re)building a device session.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Requested output sample rate in Hz.
    pub sample_rate: u32,
    /// Requested output channel count.
    pub channels: u16,
    /// Preferred PCM sample format.
    pub format: SampleFormat,
    /// Per-poll timeout when waiting for the device to change state.
    pub state_poll_timeout_ms: u64,
    /// Total time a state-convergence wait may take before it is reported as failed.
    pub state_wait_budget_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            render_pause_poll_ms: 50,
            decode_pause_poll_ms: 10,
            default_frame_rate: 25.0,
            live_queue_depth: 64,
            audio: AudioSettings::default(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            format: SampleFormat::I16,
            state_poll_timeout_ms: 100,
            state_wait_budget_ms: 1_000,
        }
    }
}

impl PlayerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Parse configuration from TOML text.
    pub fn parse(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<PlayerConfig>(raw)?;
        Ok(cfg)
    }

    pub fn render_pause_poll(&self) -> Duration {
        Duration::from_millis(self.render_pause_poll_ms.max(1))
    }

    pub fn decode_pause_poll(&self) -> Duration {
        Duration::from_millis(self.decode_pause_poll_ms.max(1))
    }
}

impl AudioSettings {
    pub fn state_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.state_poll_timeout_ms.max(1))
    }

    pub fn state_wait_budget(&self) -> Duration {
        Duration::from_millis(self.state_wait_budget_ms)
    }
}
