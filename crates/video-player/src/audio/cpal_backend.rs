//! [`AudioDevice`] implementation on top of CPAL.
//!
//! A CPAL stream must stay on the thread that built it, so each session owns a
//! dedicated `audio-output` thread that holds the stream and applies play/pause
//! commands. State changes are published through a mutex/condvar pair that the
//! controller waits on.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};

use super::decode::{self, SourceSpec};
use super::device::{pick_device, pick_output_config};
use super::output::{OutputControl, build_output_stream};
use super::pcm::{PcmBuffer, capacity_for};
use super::{
    AudioConfig, AudioDevice, AudioSession, DeviceError, DeviceResult, RateRange, StreamState,
};

const BUFFER_SECONDS: f32 = 0.5;
const REFILL_MAX_FRAMES: usize = 1024;

/// Plays through the host's CPAL output devices.
#[derive(Clone, Debug)]
pub struct CpalDevice {
    buffer_seconds: f32,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            buffer_seconds: BUFFER_SECONDS,
        }
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for CpalDevice {
    fn open(&self, config: &AudioConfig) -> DeviceResult<Box<dyn AudioSession>> {
        match CpalSession::open(config, self.buffer_seconds) {
            Ok(session) => Ok(Box::new(session)),
            Err(e) => {
                tracing::warn!("audio session open failed: {e:#}");
                Err(DeviceError::Backend(format!("{e:#}")))
            }
        }
    }
}

/// Stream state shared between a session and its output thread.
struct SharedState {
    state: Mutex<StreamState>,
    cv: Condvar,
}

impl SharedState {
    fn new(initial: StreamState) -> Self {
        Self {
            state: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    fn get(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: StreamState) {
        let mut g = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // A lost device stays lost.
        if *g != StreamState::Disconnected {
            *g = next;
        }
        drop(g);
        self.cv.notify_all();
    }

    fn wait_change(&self, current: StreamState, timeout: Duration) -> DeviceResult<StreamState> {
        let deadline = Instant::now() + timeout;
        let mut g = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *g == current {
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::Timeout);
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        Ok(*g)
    }
}

enum OutputCommand {
    Play,
    Pause,
    Stop,
}

/// Play/pause on whatever the output thread holds.
trait OutputStream {
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
}

impl OutputStream for cpal::Stream {
    fn play(&self) -> Result<()> {
        cpal::traits::StreamTrait::play(self).context("play stream")
    }

    fn pause(&self) -> Result<()> {
        cpal::traits::StreamTrait::pause(self).context("pause stream")
    }
}

/// Output thread body: apply commands until `Stop` or the session goes away.
fn run_output<S: OutputStream>(
    stream: S,
    commands: Receiver<OutputCommand>,
    shared: &SharedState,
    paused: &AtomicBool,
) {
    for command in commands.iter() {
        match command {
            OutputCommand::Play => match stream.play() {
                Ok(()) => {
                    paused.store(false, Ordering::Relaxed);
                    shared.set(StreamState::Started);
                }
                Err(e) => {
                    tracing::warn!("audio stream play failed: {e:#}");
                    shared.set(StreamState::Disconnected);
                }
            },
            OutputCommand::Pause => {
                paused.store(true, Ordering::Relaxed);
                if let Err(e) = stream.pause() {
                    tracing::debug!("stream pause unsupported, output muted instead: {e:#}");
                }
                shared.set(StreamState::Paused);
            }
            OutputCommand::Stop => break,
        }
    }
    drop(stream);
    shared.set(StreamState::Stopped);
}

/// One CPAL output stream plus the optional file decode feeding it.
pub struct CpalSession {
    shared: Arc<SharedState>,
    commands: Sender<OutputCommand>,
    paused: Arc<AtomicBool>,
    buffer: Arc<PcmBuffer>,
    source: Option<PathBuf>,
    decode: Option<JoinHandle<()>>,
    output: Option<JoinHandle<()>>,
}

impl CpalSession {
    fn open(config: &AudioConfig, buffer_seconds: f32) -> Result<Self> {
        let spec = match &config.source {
            Some(path) => decode::probe(path)?,
            None => SourceSpec {
                sample_rate: config.sample_rate,
                channels: usize::from(config.channels),
                duration_ms: None,
                codec: None,
            },
        };
        let buffer = Arc::new(PcmBuffer::new(
            spec.channels,
            capacity_for(spec.sample_rate, spec.channels, buffer_seconds),
        ));
        let shared = Arc::new(SharedState::new(StreamState::Open));
        let paused = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let request = OutputRequest {
            device: config.device.clone(),
            rate: spec.sample_rate,
            channels: u16::try_from(spec.channels).unwrap_or(config.channels),
            format: config.format,
        };
        let output = {
            let shared = shared.clone();
            let paused = paused.clone();
            let buffer = buffer.clone();
            thread::Builder::new()
                .name("audio-output".into())
                .spawn(move || match request.build(buffer, &paused, &shared) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        run_output(stream, cmd_rx, &shared, &paused);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .context("spawn audio output thread")?
        };

        let ready = ready_rx
            .recv()
            .context("audio output thread exited during setup")
            .and_then(|r| r);
        if let Err(e) = ready {
            let _ = output.join();
            return Err(e);
        }

        let mut session = Self::from_parts(shared, cmd_tx, paused, buffer, config.source.clone(), output);
        if config.source.is_some() {
            session.restart_decode(0)?;
        }
        tracing::info!(
            rate = spec.sample_rate,
            channels = spec.channels,
            codec = spec.codec.as_deref().unwrap_or("none"),
            "audio session opened"
        );
        Ok(session)
    }

    fn from_parts(
        shared: Arc<SharedState>,
        commands: Sender<OutputCommand>,
        paused: Arc<AtomicBool>,
        buffer: Arc<PcmBuffer>,
        source: Option<PathBuf>,
        output: JoinHandle<()>,
    ) -> Self {
        Self {
            shared,
            commands,
            paused,
            buffer,
            source,
            decode: None,
            output: Some(output),
        }
    }

    fn send(&self, command: OutputCommand) -> DeviceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| DeviceError::Disconnected)
    }

    fn restart_decode(&mut self, start_ms: u64) -> Result<()> {
        let Some(path) = self.source.clone() else {
            return Ok(());
        };
        let generation = self.buffer.restart();
        if let Some(old) = self.decode.take() {
            let _ = old.join();
        }
        let (_spec, handle) = decode::spawn_decode(path, start_ms, self.buffer.clone(), generation)?;
        self.decode = Some(handle);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.buffer.shutdown();
        let _ = self.commands.send(OutputCommand::Stop);
        if let Some(handle) = self.output.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.decode.take() {
            let _ = handle.join();
        }
    }

    fn ensure_usable(&self) -> DeviceResult<StreamState> {
        match self.shared.get() {
            StreamState::Disconnected => Err(DeviceError::Disconnected),
            state @ (StreamState::Stopping | StreamState::Stopped) => {
                Err(DeviceError::InvalidState(state))
            }
            state => Ok(state),
        }
    }
}

struct OutputRequest {
    device: Option<String>,
    rate: u32,
    channels: u16,
    format: super::SampleFormat,
}

impl OutputRequest {
    fn build(
        self,
        buffer: Arc<PcmBuffer>,
        paused: &Arc<AtomicBool>,
        shared: &Arc<SharedState>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.device.as_deref())?;
        let supported = pick_output_config(&device, self.rate, self.channels, self.format)?;
        if supported.sample_rate() != self.rate {
            tracing::warn!(
                requested = self.rate,
                actual = supported.sample_rate(),
                "device cannot play the source rate; pitch will be off"
            );
        }
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        tracing::debug!(
            rate = stream_config.sample_rate,
            channels = stream_config.channels,
            ?sample_format,
            "audio output config"
        );
        let on_error = {
            let shared = shared.clone();
            move |err: cpal::StreamError| {
                tracing::warn!("audio stream error: {err}");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    shared.set(StreamState::Disconnected);
                }
            }
        };
        build_output_stream(
            &device,
            &stream_config,
            sample_format,
            buffer,
            OutputControl {
                paused: paused.clone(),
                refill_max_frames: REFILL_MAX_FRAMES,
            },
            on_error,
        )
    }
}

impl AudioSession for CpalSession {
    fn request_start(&mut self) -> DeviceResult<()> {
        self.ensure_usable()?;
        self.shared.set(StreamState::Starting);
        self.send(OutputCommand::Play)
    }

    fn request_pause(&mut self) -> DeviceResult<()> {
        self.ensure_usable()?;
        self.paused.store(true, Ordering::Relaxed);
        self.shared.set(StreamState::Pausing);
        self.send(OutputCommand::Pause)
    }

    fn request_flush(&mut self) -> DeviceResult<()> {
        match self.ensure_usable()? {
            StreamState::Paused | StreamState::Flushed => {}
            state => return Err(DeviceError::InvalidState(state)),
        }
        self.shared.set(StreamState::Flushing);
        let dropped = self.buffer.clear();
        tracing::debug!(frames = dropped, "audio buffer flushed");
        self.shared.set(StreamState::Flushed);
        Ok(())
    }

    fn request_stop(&mut self) -> DeviceResult<()> {
        if self.output.is_none() {
            return Ok(());
        }
        self.shared.set(StreamState::Stopping);
        self.shutdown();
        Ok(())
    }

    fn state(&self) -> StreamState {
        self.shared.get()
    }

    fn wait_for_state_change(
        &mut self,
        current: StreamState,
        timeout: Duration,
    ) -> DeviceResult<StreamState> {
        self.shared.wait_change(current, timeout)
    }

    fn supports_seek(&self) -> bool {
        self.source.is_some()
    }

    fn set_looping(&mut self, looping: bool) -> DeviceResult<()> {
        if looping {
            Err(DeviceError::Unsupported("looping"))
        } else {
            Ok(())
        }
    }

    fn set_position(&mut self, position_ms: u64) -> DeviceResult<()> {
        if self.source.is_none() {
            return Err(DeviceError::Unsupported("seek"));
        }
        self.ensure_usable()?;
        self.restart_decode(position_ms)
            .map_err(|e| DeviceError::Backend(format!("{e:#}")))
    }

    fn rate_range(&self) -> DeviceResult<RateRange> {
        Ok(RateRange {
            min_permille: 1000,
            max_permille: 1000,
            step_permille: 0,
        })
    }

    fn set_rate(&mut self, permille: u32) -> DeviceResult<()> {
        if permille == 1000 {
            Ok(())
        } else {
            Err(DeviceError::Unsupported("playback rate"))
        }
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        if self.output.is_some() {
            self.shutdown();
        }
    }
}
