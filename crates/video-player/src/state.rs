//! Session control state shared by the command surface and the pipeline threads.
//!
//! Every field is independently atomic; no update needs a cross-field transaction.
//! A reader may see a `current_frame` that predates a just-issued seek by one loop
//! iteration, which is acceptable for position queries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::frame;

const NO_SEEK: i64 = -1;

/// Playback control flags and stream facts for one player.
#[derive(Debug)]
pub struct PlaybackControl {
    playing: AtomicBool,
    paused: AtomicBool,
    abort: AtomicBool,
    speed_bits: AtomicU32,
    seek_target: AtomicI64,
    current_frame: AtomicI64,
    frame_rate_bits: AtomicU64,
    width: AtomicU32,
    height: AtomicU32,
    position_ms: AtomicU64,
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new(25.0)
    }
}

impl PlaybackControl {
    /// Create control state with `default_frame_rate` until a source reports its own.
    pub fn new(default_frame_rate: f64) -> Self {
        let rate = if default_frame_rate.is_finite() && default_frame_rate > 0.0 {
            default_frame_rate
        } else {
            25.0
        };
        Self {
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            speed_bits: AtomicU32::new(1.0f32.to_bits()),
            seek_target: AtomicI64::new(NO_SEEK),
            current_frame: AtomicI64::new(0),
            frame_rate_bits: AtomicU64::new(rate.to_bits()),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            position_ms: AtomicU64::new(0),
        }
    }

    /// Create a reference-counted handle for sharing across pipeline threads.
    pub fn shared(default_frame_rate: f64) -> Arc<Self> {
        Arc::new(Self::new(default_frame_rate))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Flip the paused flag and return the new value.
    pub fn toggle_paused(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::Release);
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    /// Set the playback rate multiplier.
    ///
    /// Values `<= 0` and non-finite values are rejected and leave the speed unchanged.
    pub fn set_speed(&self, speed: f32) -> bool {
        if !speed.is_finite() || speed <= 0.0 {
            tracing::warn!(speed, "invalid speed factor rejected");
            return false;
        }
        self.speed_bits.store(speed.to_bits(), Ordering::Relaxed);
        true
    }

    /// Record a seek request. Rapid requests collapse to the most recent one.
    pub fn request_seek(&self, frame: i64) -> bool {
        if frame < 0 {
            tracing::warn!(frame, "negative seek target rejected");
            return false;
        }
        self.seek_target.store(frame, Ordering::Release);
        true
    }

    /// Peek at the pending seek target without consuming it.
    pub fn pending_seek(&self) -> Option<i64> {
        match self.seek_target.load(Ordering::Acquire) {
            NO_SEEK => None,
            frame => Some(frame),
        }
    }

    /// Consume the pending seek target, if any.
    ///
    /// The exchange guarantees a request is served at most once and a request
    /// issued concurrently is either returned here or left for the next call.
    pub fn take_seek(&self) -> Option<i64> {
        match self.seek_target.swap(NO_SEEK, Ordering::AcqRel) {
            NO_SEEK => None,
            frame => Some(frame),
        }
    }

    pub fn current_frame(&self) -> i64 {
        self.current_frame.load(Ordering::Relaxed)
    }

    pub fn set_current_frame(&self, frame: i64) {
        self.current_frame.store(frame.max(0), Ordering::Relaxed);
    }

    pub fn frame_rate(&self) -> f64 {
        f64::from_bits(self.frame_rate_bits.load(Ordering::Relaxed))
    }

    pub fn set_frame_rate(&self, rate: f64) -> bool {
        if !rate.is_finite() || rate <= 0.0 {
            tracing::warn!(rate, "invalid frame rate ignored");
            return false;
        }
        self.frame_rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        true
    }

    /// Frame dimensions, once known.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let w = self.width.load(Ordering::Acquire);
        let h = self.height.load(Ordering::Acquire);
        if w == 0 || h == 0 { None } else { Some((w, h)) }
    }

    /// Publish the frame dimensions for the active source.
    ///
    /// Dimensions are fixed once set; a conflicting update is refused until
    /// [`PlaybackControl::reset_geometry`] is called for a new source.
    pub fn set_dimensions(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            tracing::warn!(width, height, "invalid frame dimensions rejected");
            return false;
        }
        match self.dimensions() {
            Some(current) if current == (width, height) => true,
            Some((cw, ch)) => {
                tracing::warn!(
                    width,
                    height,
                    current_width = cw,
                    current_height = ch,
                    "frame dimensions already fixed"
                );
                false
            }
            None => {
                self.width.store(width, Ordering::Release);
                self.height.store(height, Ordering::Release);
                true
            }
        }
    }

    /// Forget the dimensions of a previous source before activating a new one.
    pub fn reset_geometry(&self) {
        self.width.store(0, Ordering::Release);
        self.height.store(0, Ordering::Release);
    }

    /// Size in bytes of one planar 4:2:0 frame, when dimensions are known.
    pub fn frame_size(&self) -> Option<usize> {
        self.dimensions().map(|(w, h)| frame::frame_size(w, h))
    }

    /// Approximate playback position published by the live extraction stage.
    pub fn position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    pub fn set_position_ms(&self, ms: u64) {
        self.position_ms.store(ms, Ordering::Relaxed);
    }

    /// Reset per-session fields after a stop.
    ///
    /// Speed, frame rate and dimensions survive so that position arithmetic
    /// (for example total frame counts) keeps working between sessions.
    pub fn reset_after_stop(&self) {
        self.set_playing(false);
        self.set_paused(false);
        self.current_frame.store(0, Ordering::Relaxed);
        self.seek_target.store(NO_SEEK, Ordering::Release);
        self.position_ms.store(0, Ordering::Relaxed);
    }
}
