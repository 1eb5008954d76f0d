//! Audio output: the device boundary, the controller state machine and a cpal backend.
//!
//! [`AudioController`](controller::AudioController) drives any [`AudioDevice`]. The
//! device reports its own [`StreamState`]; the controller requests transitions and
//! polls until the device converges or a wait budget runs out.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Deserialize;

pub mod controller;
pub mod cpal_backend;
pub mod decode;
pub mod device;
pub mod output;
pub mod pcm;

pub use controller::{AudioController, ControllerState};

/// PCM sample format requested from the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    I16,
    F32,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::I16 => f.write_str("i16"),
            SampleFormat::F32 => f.write_str("f32"),
        }
    }
}

/// Parameters for opening a device session.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Audio file to play, for devices that decode their own source.
    pub source: Option<PathBuf>,
    /// Case-insensitive device name substring; `None` picks the default device.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            format: SampleFormat::I16,
            source: None,
            device: None,
        }
    }
}

/// Device-side stream state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Starting,
    Started,
    Pausing,
    Paused,
    Flushing,
    Flushed,
    Stopping,
    Stopped,
    Disconnected,
}

/// Failure reported by a device call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// The device lacks the requested capability.
    Unsupported(&'static str),
    /// A state-change wait timed out without a change.
    Timeout,
    /// The call is not valid in the current state.
    InvalidState(StreamState),
    /// The device went away.
    Disconnected,
    /// Backend-specific failure.
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unsupported(what) => write!(f, "unsupported: {what}"),
            DeviceError::Timeout => f.write_str("timed out waiting for state change"),
            DeviceError::InvalidState(state) => write!(f, "invalid in state {state:?}"),
            DeviceError::Disconnected => f.write_str("device disconnected"),
            DeviceError::Backend(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for DeviceError {}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Supported playback rate range in permille (1000 = normal speed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateRange {
    pub min_permille: u32,
    pub max_permille: u32,
    pub step_permille: u32,
}

impl RateRange {
    pub fn clamp(&self, permille: u32) -> u32 {
        permille.clamp(self.min_permille, self.max_permille.max(self.min_permille))
    }
}

/// Something that can open audio output sessions.
pub trait AudioDevice: Send + Sync {
    fn open(&self, config: &AudioConfig) -> DeviceResult<Box<dyn AudioSession>>;
}

/// One open output stream.
///
/// `request_*` calls only start a transition; callers observe completion through
/// [`AudioSession::state`] and [`AudioSession::wait_for_state_change`].
pub trait AudioSession: Send {
    fn request_start(&mut self) -> DeviceResult<()>;
    fn request_pause(&mut self) -> DeviceResult<()>;
    fn request_flush(&mut self) -> DeviceResult<()>;
    fn request_stop(&mut self) -> DeviceResult<()>;

    fn state(&self) -> StreamState;

    /// Block until the state differs from `current` or `timeout` passes.
    ///
    /// Returns the state observed at return, or [`DeviceError::Timeout`].
    fn wait_for_state_change(
        &mut self,
        current: StreamState,
        timeout: Duration,
    ) -> DeviceResult<StreamState>;

    fn supports_seek(&self) -> bool {
        false
    }

    fn set_looping(&mut self, looping: bool) -> DeviceResult<()> {
        let _ = looping;
        Err(DeviceError::Unsupported("looping"))
    }

    fn set_position(&mut self, position_ms: u64) -> DeviceResult<()> {
        let _ = position_ms;
        Err(DeviceError::Unsupported("seek"))
    }

    fn rate_range(&self) -> DeviceResult<RateRange> {
        Err(DeviceError::Unsupported("playback rate"))
    }

    fn set_rate(&mut self, permille: u32) -> DeviceResult<()> {
        let _ = permille;
        Err(DeviceError::Unsupported("playback rate"))
    }
}

/// Outcome of waiting for a device to reach a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateWait {
    /// Last state seen.
    pub observed: StreamState,
    /// Whether `observed` is the target.
    pub reached: bool,
}

/// Poll `session` until it reports `target`, a non-transient other state, or `budget` runs out.
///
/// Each poll waits at most `poll`.
pub fn await_state(
    session: &mut dyn AudioSession,
    target: StreamState,
    poll: Duration,
    budget: Duration,
) -> StateWait {
    let deadline = Instant::now() + budget;
    let mut observed = session.state();
    loop {
        if observed == target {
            return StateWait {
                observed,
                reached: true,
            };
        }
        if observed == StreamState::Disconnected {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match session.wait_for_state_change(observed, poll.min(deadline - now)) {
            Ok(next) => observed = next,
            Err(DeviceError::Timeout) => observed = session.state(),
            Err(e) => {
                tracing::warn!(?target, "state wait failed: {e}");
                observed = session.state();
                break;
            }
        }
    }
    StateWait {
        observed,
        reached: observed == target,
    }
}
