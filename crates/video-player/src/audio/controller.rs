//! Audio device controller.
//!
//! States: `Idle -> Started <-> Paused`, plus a transient `Flushing` that is only
//! entered from `Started`/`Paused` and always leaves towards `Started`.
//! Every device call is checked; a failed call is logged and leaves the tracked
//! state unchanged, except that a timed-out wait records the last observed state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use super::{AudioConfig, AudioDevice, AudioSession, StreamState, await_state};
use crate::config::AudioSettings;

/// Controller-level view of the device session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Started,
    Paused,
    Flushing,
}

impl ControllerState {
    fn from_observed(state: StreamState) -> Option<Self> {
        match state {
            StreamState::Started => Some(ControllerState::Started),
            StreamState::Paused => Some(ControllerState::Paused),
            StreamState::Flushing | StreamState::Flushed => Some(ControllerState::Flushing),
            _ => None,
        }
    }
}

/// Drives one [`AudioDevice`] through start/pause/flush/seek/rate changes.
pub struct AudioController {
    device: Arc<dyn AudioDevice>,
    config: AudioConfig,
    poll: Duration,
    budget: Duration,
    session: Option<Box<dyn AudioSession>>,
    state: ControllerState,
    pending_start_ms: Option<u64>,
    rate: f32,
}

impl AudioController {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        config: AudioConfig,
        poll: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            device,
            config,
            poll,
            budget,
            session: None,
            state: ControllerState::Idle,
            pending_start_ms: None,
            rate: 1.0,
        }
    }

    /// Build a controller from configured settings.
    pub fn with_settings(
        device: Arc<dyn AudioDevice>,
        settings: &AudioSettings,
        source: Option<PathBuf>,
        device_name: Option<String>,
    ) -> Self {
        let config = AudioConfig {
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            format: settings.format,
            source,
            device: device_name,
        };
        Self::new(
            device,
            config,
            settings.state_poll_timeout(),
            settings.state_wait_budget(),
        )
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Offset that the next [`AudioController::start`] will seek to.
    pub fn pending_start_offset(&self) -> Option<u64> {
        self.pending_start_ms
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Open a fresh session and start it.
    ///
    /// Any existing session is torn down first. On failure the new session is
    /// discarded and the controller stays `Idle`.
    pub fn start(&mut self) -> Result<()> {
        self.teardown();

        let mut session = self
            .device
            .open(&self.config)
            .context("open audio session")?;

        if let Some(ms) = self.pending_start_ms {
            if session.supports_seek() {
                if let Err(e) = session.set_looping(false) {
                    tracing::warn!("disable looping before start offset failed: {e}");
                }
                match session.set_position(ms) {
                    Ok(()) => tracing::info!(offset_ms = ms, "audio start offset applied"),
                    Err(e) => tracing::warn!(offset_ms = ms, "audio start offset failed: {e}"),
                }
            } else {
                tracing::warn!(offset_ms = ms, "audio session cannot seek; starting at 0");
            }
        }

        if let Err(e) = apply_rate(session.as_mut(), self.rate) {
            tracing::warn!("initial audio rate not applied: {e:#}");
        }

        if let Err(e) = session.request_start() {
            discard(session);
            bail!("audio start request failed: {e}");
        }
        let wait = await_state(session.as_mut(), StreamState::Started, self.poll, self.budget);
        if !wait.reached {
            discard(session);
            bail!("audio device did not start (last state {:?})", wait.observed);
        }

        self.pending_start_ms = None;
        self.session = Some(session);
        self.state = ControllerState::Started;
        tracing::info!(
            sample_rate = self.config.sample_rate,
            channels = self.config.channels,
            format = %self.config.format,
            "audio started"
        );
        Ok(())
    }

    /// Stop and destroy the session and forget any pending start offset.
    pub fn stop(&mut self) {
        if self.session.is_some() {
            tracing::info!("audio stopped");
        }
        self.teardown();
        self.pending_start_ms = None;
    }

    /// Pause (`true`) or resume (`false`) and wait for the device to converge.
    ///
    /// Requesting the state the controller is already in makes no device call.
    pub fn pause(&mut self, pause: bool) -> Result<()> {
        let target = if pause {
            ControllerState::Paused
        } else {
            ControllerState::Started
        };
        if self.state == target {
            tracing::debug!(?target, "audio already in requested state");
            return Ok(());
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("audio is not started"))?;

        let requested = if pause {
            session.request_pause()
        } else {
            session.request_start()
        };
        if let Err(e) = requested {
            tracing::warn!(pause, "audio state request failed: {e}");
            bail!("audio state request failed: {e}");
        }

        let device_target = if pause {
            StreamState::Paused
        } else {
            StreamState::Started
        };
        let wait = await_state(session.as_mut(), device_target, self.poll, self.budget);
        if let Some(observed) = ControllerState::from_observed(wait.observed) {
            self.state = observed;
        }
        if !wait.reached {
            tracing::warn!(pause, observed = ?wait.observed, "audio state change timed out");
            bail!("audio did not reach {:?} (last state {:?})", device_target, wait.observed);
        }
        Ok(())
    }

    /// Drop buffered audio while keeping the session alive.
    pub fn flush(&mut self) -> Result<()> {
        if self.state == ControllerState::Idle {
            bail!("audio is not started");
        }
        self.pause(true)?;

        self.state = ControllerState::Flushing;
        let flushed = match self.session.as_mut() {
            Some(session) => match session.request_flush() {
                Ok(()) => {
                    let wait =
                        await_state(session.as_mut(), StreamState::Flushed, self.poll, self.budget);
                    if !wait.reached {
                        tracing::warn!(observed = ?wait.observed, "audio flush did not converge");
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!("audio flush request failed: {e}");
                    Err(anyhow!("audio flush failed: {e}"))
                }
            },
            None => Err(anyhow!("audio session vanished during flush")),
        };

        let restarted = self.pause(false);
        flushed.and(restarted)
    }

    /// Apply a playback speed multiplier, clamped to what the device supports.
    ///
    /// The factor is remembered and re-applied on the next start.
    pub fn set_rate(&mut self, factor: f32) -> Result<()> {
        if !factor.is_finite() || factor <= 0.0 {
            tracing::warn!(factor, "invalid audio rate rejected");
            bail!("invalid audio rate {factor}");
        }
        self.rate = factor;
        match self.session.as_mut() {
            Some(session) => apply_rate(session.as_mut(), factor),
            None => Ok(()),
        }
    }

    /// Seek to `position_ms`, or remember it for the next start.
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        let seekable = self.state != ControllerState::Idle
            && self.session.as_ref().is_some_and(|s| s.supports_seek());
        if !seekable {
            self.pending_start_ms = Some(position_ms);
            tracing::info!(position_ms, "audio seek stored as start offset");
            return Ok(());
        }

        let was_playing = self.state == ControllerState::Started;
        if was_playing {
            self.pause(true)?;
        }

        let result = match self.session.as_mut() {
            Some(session) => {
                if let Err(e) = session.set_looping(false) {
                    tracing::warn!("disable looping before seek failed: {e}");
                }
                session.set_position(position_ms)
            }
            None => Err(super::DeviceError::Disconnected),
        };
        match &result {
            Ok(()) => tracing::info!(position_ms, "audio seek applied"),
            Err(e) => tracing::warn!(position_ms, "audio seek failed: {e}"),
        }

        if was_playing {
            self.pause(false)?;
        }
        result.map_err(|e| anyhow!("audio seek failed: {e}"))
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            discard(session);
        }
        self.state = ControllerState::Idle;
    }
}

impl Drop for AudioController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn discard(mut session: Box<dyn AudioSession>) {
    if let Err(e) = session.request_stop() {
        tracing::debug!("audio stop request failed: {e}");
    }
}

/// Convert `factor` to permille, clamp to the device range and apply it.
fn apply_rate(session: &mut dyn AudioSession, factor: f32) -> Result<()> {
    let requested = (factor * 1000.0).round().max(1.0) as u32;
    let permille = match session.rate_range() {
        Ok(range) => {
            let clamped = range.clamp(requested);
            if clamped != requested {
                tracing::warn!(
                    requested,
                    clamped,
                    min = range.min_permille,
                    max = range.max_permille,
                    "audio rate clamped to device range"
                );
            }
            clamped
        }
        Err(e) => {
            tracing::warn!(requested, "audio rate range unavailable, applying unclamped: {e}");
            requested
        }
    };
    session
        .set_rate(permille)
        .map_err(|e| anyhow!("set audio rate {permille}\u{2030} failed: {e}"))?;
    tracing::debug!(permille, "audio rate applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DeviceError, DeviceResult, RateRange};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Behaviour {
        fail_open: bool,
        never_start: bool,
        stuck_pausing: bool,
        seekable: bool,
        rate_range: Option<RateRange>,
    }

    #[derive(Clone, Default)]
    struct MockDevice {
        log: Arc<Mutex<Vec<String>>>,
        behaviour: Behaviour,
    }

    impl MockDevice {
        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn clear(&self) {
            self.log.lock().unwrap().clear();
        }
    }

    struct MockSession {
        log: Arc<Mutex<Vec<String>>>,
        behaviour: Behaviour,
        state: StreamState,
    }

    impl MockSession {
        fn record(&self, call: impl Into<String>) {
            self.log.lock().unwrap().push(call.into());
        }
    }

    impl AudioDevice for MockDevice {
        fn open(&self, _config: &AudioConfig) -> DeviceResult<Box<dyn AudioSession>> {
            self.log.lock().unwrap().push("open".into());
            if self.behaviour.fail_open {
                return Err(DeviceError::Backend("no device".into()));
            }
            Ok(Box::new(MockSession {
                log: self.log.clone(),
                behaviour: self.behaviour.clone(),
                state: StreamState::Open,
            }))
        }
    }

    impl AudioSession for MockSession {
        fn request_start(&mut self) -> DeviceResult<()> {
            self.record("start");
            self.state = if self.behaviour.never_start {
                StreamState::Starting
            } else {
                StreamState::Started
            };
            Ok(())
        }
        fn request_pause(&mut self) -> DeviceResult<()> {
            self.record("pause");
            self.state = if self.behaviour.stuck_pausing {
                StreamState::Pausing
            } else {
                StreamState::Paused
            };
            Ok(())
        }
        fn request_flush(&mut self) -> DeviceResult<()> {
            self.record("flush");
            self.state = StreamState::Flushed;
            Ok(())
        }
        fn request_stop(&mut self) -> DeviceResult<()> {
            self.record("stop");
            self.state = StreamState::Stopped;
            Ok(())
        }
        fn state(&self) -> StreamState {
            self.state
        }
        fn wait_for_state_change(
            &mut self,
            current: StreamState,
            timeout: Duration,
        ) -> DeviceResult<StreamState> {
            if self.state != current {
                return Ok(self.state);
            }
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            Err(DeviceError::Timeout)
        }
        fn supports_seek(&self) -> bool {
            self.behaviour.seekable
        }
        fn set_looping(&mut self, looping: bool) -> DeviceResult<()> {
            self.record(format!("loop {looping}"));
            Ok(())
        }
        fn set_position(&mut self, position_ms: u64) -> DeviceResult<()> {
            self.record(format!("position {position_ms}"));
            Ok(())
        }
        fn rate_range(&self) -> DeviceResult<RateRange> {
            self.behaviour
                .rate_range
                .ok_or(DeviceError::Unsupported("playback rate"))
        }
        fn set_rate(&mut self, permille: u32) -> DeviceResult<()> {
            self.record(format!("rate {permille}"));
            Ok(())
        }
    }

    fn controller(device: &MockDevice) -> AudioController {
        AudioController::new(
            Arc::new(device.clone()),
            AudioConfig::default(),
            Duration::from_millis(5),
            Duration::from_millis(40),
        )
    }

    #[test]
    fn start_reaches_started() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        assert_eq!(ctl.state(), ControllerState::Started);
        assert_eq!(device.calls(), vec!["open", "rate 1000", "start"]);
    }

    #[test]
    fn second_pause_makes_no_device_call() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        ctl.pause(true).unwrap();
        device.clear();

        ctl.pause(true).unwrap();
        assert_eq!(ctl.state(), ControllerState::Paused);
        assert!(device.calls().is_empty());

        ctl.pause(false).unwrap();
        assert_eq!(ctl.state(), ControllerState::Started);
        assert_eq!(device.calls(), vec!["start"]);
    }

    #[test]
    fn failed_open_stays_idle() {
        let device = MockDevice {
            behaviour: Behaviour {
                fail_open: true,
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        assert!(ctl.start().is_err());
        assert_eq!(ctl.state(), ControllerState::Idle);
        assert!(ctl.pause(true).is_err());
    }

    #[test]
    fn start_that_never_converges_discards_session() {
        let device = MockDevice {
            behaviour: Behaviour {
                never_start: true,
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        assert!(ctl.start().is_err());
        assert_eq!(ctl.state(), ControllerState::Idle);
        assert_eq!(device.calls().last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn pause_timeout_is_reported_and_state_kept() {
        let device = MockDevice {
            behaviour: Behaviour {
                stuck_pausing: true,
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        assert!(ctl.pause(true).is_err());
        assert_eq!(ctl.state(), ControllerState::Started);
    }

    #[test]
    fn flush_pauses_flushes_and_restarts() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        device.clear();
        ctl.flush().unwrap();
        assert_eq!(device.calls(), vec!["pause", "flush", "start"]);
        assert_eq!(ctl.state(), ControllerState::Started);
    }

    #[test]
    fn flush_requires_a_session() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        assert!(ctl.flush().is_err());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn rate_is_clamped_to_device_range() {
        let device = MockDevice {
            behaviour: Behaviour {
                rate_range: Some(RateRange {
                    min_permille: 500,
                    max_permille: 2000,
                    step_permille: 100,
                }),
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        device.clear();
        ctl.set_rate(3.0).unwrap();
        ctl.set_rate(1.25).unwrap();
        assert_eq!(device.calls(), vec!["rate 2000", "rate 1250"]);
    }

    #[test]
    fn rate_without_range_is_applied_unclamped() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        device.clear();
        ctl.set_rate(3.0).unwrap();
        assert_eq!(device.calls(), vec!["rate 3000"]);
        assert!(ctl.set_rate(0.0).is_err());
        assert!(ctl.set_rate(-2.0).is_err());
    }

    #[test]
    fn seek_while_idle_becomes_start_offset() {
        let device = MockDevice {
            behaviour: Behaviour {
                seekable: true,
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        ctl.seek(4_000).unwrap();
        assert_eq!(ctl.pending_start_offset(), Some(4_000));
        assert!(device.calls().is_empty());

        ctl.start().unwrap();
        assert_eq!(
            device.calls(),
            vec!["open", "loop false", "position 4000", "rate 1000", "start"]
        );
        assert_eq!(ctl.pending_start_offset(), None);
    }

    #[test]
    fn seek_while_playing_pauses_positions_and_resumes() {
        let device = MockDevice {
            behaviour: Behaviour {
                seekable: true,
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        device.clear();
        ctl.seek(1_500).unwrap();
        assert_eq!(
            device.calls(),
            vec!["pause", "loop false", "position 1500", "start"]
        );
        assert_eq!(ctl.state(), ControllerState::Started);
    }

    #[test]
    fn seek_while_paused_stays_paused() {
        let device = MockDevice {
            behaviour: Behaviour {
                seekable: true,
                ..Behaviour::default()
            },
            ..MockDevice::default()
        };
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        ctl.pause(true).unwrap();
        device.clear();
        ctl.seek(200).unwrap();
        assert_eq!(device.calls(), vec!["loop false", "position 200"]);
        assert_eq!(ctl.state(), ControllerState::Paused);
    }

    #[test]
    fn seek_without_capability_is_deferred() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        ctl.start().unwrap();
        device.clear();
        ctl.seek(900).unwrap();
        assert!(device.calls().is_empty());
        assert_eq!(ctl.pending_start_offset(), Some(900));
    }

    #[test]
    fn stop_clears_offset_and_drop_stops_session() {
        let device = MockDevice::default();
        let mut ctl = controller(&device);
        ctl.seek(10).unwrap();
        ctl.stop();
        assert_eq!(ctl.pending_start_offset(), None);
        assert_eq!(ctl.state(), ControllerState::Idle);

        ctl.start().unwrap();
        device.clear();
        drop(ctl);
        assert_eq!(device.calls(), vec!["stop"]);
    }
}
