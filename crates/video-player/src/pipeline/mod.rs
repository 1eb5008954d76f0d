//! Session orchestration.
//!
//! A [`Player`] owns one [`PlaybackControl`] for its whole life and at most one
//! running session: the frame-source threads plus, for live sources, the queue
//! between them. Control calls only flip atomics; the session threads observe
//! them. An attached [`AudioController`] receives the same pause, speed and seek
//! commands.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Result, anyhow};

use crate::audio::{AudioController, ControllerState};
use crate::config::PlayerConfig;
use crate::frame;
use crate::render::Renderer;
use crate::source::live::{LiveOptions, LiveQueue, LiveSource};
use crate::source::precomputed::PrecomputedSource;
use crate::source::y4m::Y4mBackend;
use crate::source::{self, MediaBackend, SourceDescriptor};
use crate::state::PlaybackControl;
use crate::status::StatusSnapshot;
use crate::surface::Surface;

/// Threads and queue of one running session.
struct SessionHandle {
    queue: Option<Arc<LiveQueue>>,
    threads: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    fn is_finished(&self) -> bool {
        self.threads.iter().all(JoinHandle::is_finished)
    }

    fn cancel(&self, control: &PlaybackControl) {
        control.request_abort();
        if let Some(queue) = &self.queue {
            queue.cancel();
        }
    }

    fn join(self) {
        for handle in self.threads {
            let name = handle.thread().name().unwrap_or("session").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "session thread panicked");
            }
        }
    }
}

pub struct Player {
    config: PlayerConfig,
    control: Arc<PlaybackControl>,
    backend: Arc<dyn MediaBackend>,
    audio: Option<AudioController>,
    session: Option<SessionHandle>,
}

impl Player {
    /// Player whose live sources are read with the built-in YUV4MPEG2 backend.
    pub fn new(config: PlayerConfig) -> Self {
        Self::with_backend(config, Arc::new(Y4mBackend))
    }

    pub fn with_backend(config: PlayerConfig, backend: Arc<dyn MediaBackend>) -> Self {
        let control = PlaybackControl::shared(config.default_frame_rate);
        Self {
            config,
            control,
            backend,
            audio: None,
            session: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Shared control state, for observers on other threads.
    pub fn control(&self) -> Arc<PlaybackControl> {
        self.control.clone()
    }

    /// Forward pause, speed and seek commands to `audio` from now on.
    pub fn attach_audio(&mut self, audio: AudioController) {
        self.audio = Some(audio);
    }

    pub fn audio_mut(&mut self) -> Option<&mut AudioController> {
        self.audio.as_mut()
    }

    /// Begin playing `source` onto `surface`, stopping any running session first.
    ///
    /// A seek requested before this call is kept and applied before the first
    /// frame is read.
    pub fn start(&mut self, source: SourceDescriptor, surface: Box<dyn Surface>) -> Result<()> {
        let pending_seek = self.control.take_seek();
        self.stop();
        if let Some(frame) = pending_seek {
            self.control.request_seek(frame);
        }
        self.control.reset_geometry();

        match self.spawn_session(source, surface) {
            Ok(session) => {
                self.session = Some(session);
                if let Some(frame) = pending_seek {
                    // The audio offset was computed before the source published its rate.
                    let ms = self.frame_to_ms(frame);
                    self.forward_seek(ms);
                }
                Ok(())
            }
            Err(e) => {
                self.control.set_playing(false);
                self.control.reset_geometry();
                tracing::error!("session start failed: {e:#}");
                Err(e)
            }
        }
    }

    fn spawn_session(
        &self,
        source: SourceDescriptor,
        surface: Box<dyn Surface>,
    ) -> Result<SessionHandle> {
        let control = &self.control;
        match source {
            SourceDescriptor::Precomputed {
                path,
                width,
                height,
                frame_rate,
            } => {
                if let Err(e) = frame::validate_dimensions(width, height) {
                    tracing::warn!(width, height, "rejected frame size: {e:#}");
                    return Err(e);
                }
                if !control.set_dimensions(width, height) {
                    return Err(anyhow!("frame size {width}x{height} conflicts with active geometry"));
                }
                if let Some(rate) = frame_rate {
                    control.set_frame_rate(rate);
                }
                let source = PrecomputedSource::open(&path, width, height, control)?;
                let renderer = Renderer::new(surface, width, height)?;
                control.set_playing(true);
                let handle =
                    source.spawn(renderer, control.clone(), self.config.render_pause_poll())?;
                tracing::info!(
                    path = %path.display(),
                    width,
                    height,
                    fps = control.frame_rate(),
                    "precomputed session started"
                );
                Ok(SessionHandle {
                    queue: None,
                    threads: vec![handle],
                })
            }
            SourceDescriptor::Live { uri } => {
                let source = LiveSource::open(self.backend.as_ref(), &uri, control)?;
                let (width, height) = (source.stream().width, source.stream().height);
                let renderer = Renderer::new(surface, width, height)?;
                let queue = Arc::new(LiveQueue::new());
                control.set_playing(true);
                let threads = source.spawn(
                    renderer,
                    control.clone(),
                    queue.clone(),
                    LiveOptions {
                        pause_poll: self.config.decode_pause_poll(),
                        queue_depth: self.config.live_queue_depth,
                    },
                )?;
                tracing::info!(uri = %uri.display(), width, height, "live session started");
                Ok(SessionHandle {
                    queue: Some(queue),
                    threads,
                })
            }
        }
    }

    /// Stop the session and the audio output, blocking until every thread has exited.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel(&self.control);
            session.join();
            tracing::info!("session stopped");
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }
        self.control.reset_after_stop();
        self.control.clear_abort();
    }

    /// Join a session whose threads ended on their own (end of stream or render failure).
    ///
    /// Returns `true` when a finished session was collected.
    pub fn reap_finished(&mut self) -> bool {
        if !self.session.as_ref().is_some_and(SessionHandle::is_finished) {
            return false;
        }
        if let Some(session) = self.session.take() {
            session.join();
            tracing::info!(frame = self.control.current_frame(), "session reached end of stream");
        }
        true
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn pause(&mut self) {
        self.set_paused(true);
    }

    pub fn resume(&mut self) {
        self.set_paused(false);
    }

    /// Flip the pause flag; returns the new value.
    pub fn toggle_pause(&mut self) -> bool {
        let paused = self.control.toggle_paused();
        self.forward_pause(paused);
        paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.control.set_paused(paused);
        self.forward_pause(paused);
    }

    fn forward_pause(&mut self, paused: bool) {
        tracing::info!(paused, "pause state changed");
        if let Some(audio) = self.audio.as_mut() {
            if let Err(e) = audio.pause(paused) {
                tracing::warn!(paused, "audio pause not applied: {e:#}");
            }
        }
    }

    /// Change playback speed; `false` if the value was rejected.
    pub fn set_speed(&mut self, speed: f32) -> bool {
        if !self.control.set_speed(speed) {
            return false;
        }
        tracing::info!(speed, "speed changed");
        if let Some(audio) = self.audio.as_mut() {
            if let Err(e) = audio.set_rate(speed) {
                tracing::warn!(speed, "audio rate not applied: {e:#}");
            }
        }
        true
    }

    /// Request a jump to frame `frame`; `false` if negative.
    pub fn seek_to_frame(&mut self, frame: i64) -> bool {
        if !self.control.request_seek(frame) {
            return false;
        }
        let ms = self.frame_to_ms(frame);
        self.forward_seek(ms);
        true
    }

    fn frame_to_ms(&self, frame: i64) -> u64 {
        (frame as f64 * 1000.0 / self.control.frame_rate()).round() as u64
    }

    /// Request a jump to `ms`, converted to a frame index at the current frame rate.
    pub fn seek_to_timestamp(&mut self, ms: i64) -> bool {
        if ms < 0 {
            tracing::warn!(ms, "negative seek timestamp rejected");
            return false;
        }
        let frame = (ms as f64 * self.control.frame_rate() / 1000.0).round() as i64;
        if !self.control.request_seek(frame) {
            return false;
        }
        self.forward_seek(ms as u64);
        true
    }

    /// Reposition the audio output. Audio buffered for the old position is
    /// flushed first when the output is playing.
    fn forward_seek(&mut self, ms: u64) {
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        if audio.state() == ControllerState::Started {
            if let Err(e) = audio.flush() {
                tracing::warn!(ms, "audio flush before seek failed: {e:#}");
            }
        }
        if let Err(e) = audio.seek(ms) {
            tracing::warn!(ms, "audio seek not applied: {e:#}");
        }
    }

    pub fn current_frame(&self) -> i64 {
        self.control.current_frame()
    }

    pub fn frame_rate(&self) -> f64 {
        self.control.frame_rate()
    }

    /// Whole frames in `path` at the known frame size, or 0 without one.
    pub fn total_frames(&self, path: &Path) -> u64 {
        match self.control.dimensions() {
            Some((width, height)) => source::total_frames(path, width, height),
            None => {
                tracing::debug!("frame count requested before dimensions are known");
                0
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.control.is_playing()
    }

    pub fn status(&self) -> StatusSnapshot {
        let snapshot = StatusSnapshot::capture(&self.control);
        match &self.audio {
            Some(audio) => snapshot.with_audio(audio.state()),
            None => snapshot,
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
