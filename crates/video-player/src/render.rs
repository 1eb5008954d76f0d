//! Render stage: frame pacing, frame skipping and stride-aware presentation.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::convert;
use crate::frame::RawFrame;
use crate::state::PlaybackControl;
use crate::surface::{LockedSurface, PixelFormat, Surface};

/// Shortest delay ever inserted between two presented frames.
pub const MIN_FRAME_DELAY: Duration = Duration::from_micros(1_000);
/// Delay used while the frame rate is still unknown (roughly 30 fps).
pub const FALLBACK_FRAME_DELAY: Duration = Duration::from_micros(33_000);
/// Speeds below this are treated as this value when pacing.
pub const MIN_PACING_SPEED: f32 = 0.01;

/// Inter-frame delay for `frame_rate` played at `speed`.
pub fn frame_delay(frame_rate: f64, speed: f32) -> Duration {
    if !frame_rate.is_finite() || frame_rate <= 0.01 {
        return FALLBACK_FRAME_DELAY;
    }
    let speed = if speed.is_finite() {
        speed.max(MIN_PACING_SPEED)
    } else {
        1.0
    } as f64;
    let micros = (1_000_000.0 / (frame_rate * speed)) as u64;
    Duration::from_micros(micros).max(MIN_FRAME_DELAY)
}

/// Drops frames under fast playback so wall-clock speed-up holds without re-decoding.
///
/// Every frame seen advances the counter; above 1x only frames where
/// `counter % floor(speed) == 0` are rendered.
#[derive(Debug, Default)]
pub struct FrameSkipper {
    counter: u64,
}

impl FrameSkipper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the next frame should be rendered at `speed`.
    pub fn should_render(&mut self, speed: f32) -> bool {
        let n = self.counter;
        self.counter = self.counter.wrapping_add(1);
        if speed > 1.0 {
            let interval = (speed.floor() as u64).max(1);
            n % interval == 0
        } else {
            true
        }
    }

    /// Restart the skip phase, e.g. after a seek.
    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Result of handing one frame to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The frame could not be drawn; the surface was still released.
    Dropped,
}

/// Owns the target surface for one session and draws frames onto it.
pub struct Renderer {
    surface: Box<dyn Surface>,
    width: u32,
    height: u32,
}

impl Renderer {
    /// Configure `surface` for `width`×`height` RGBA output.
    pub fn new(mut surface: Box<dyn Surface>, width: u32, height: u32) -> Result<Self> {
        surface
            .set_geometry(width, height, PixelFormat::Rgba8888)
            .with_context(|| format!("set surface geometry {width}x{height}"))?;
        Ok(Self {
            surface,
            width,
            height,
        })
    }

    /// Convert `frame` and present it.
    ///
    /// A lock failure is returned as an error and should end the session.
    /// A frame that cannot be converted is logged and reported as [`PresentOutcome::Dropped`].
    pub fn present(&mut self, frame: &RawFrame) -> Result<PresentOutcome> {
        let mut guard =
            LockedSurface::acquire(self.surface.as_mut()).context("lock surface")?;
        if (frame.width(), frame.height()) != (self.width, self.height) {
            tracing::warn!(
                frame_width = frame.width(),
                frame_height = frame.height(),
                width = self.width,
                height = self.height,
                "frame size does not match surface; dropped"
            );
            return Ok(PresentOutcome::Dropped);
        }
        let buffer = match guard.buffer() {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("surface buffer unavailable: {e:#}");
                return Ok(PresentOutcome::Dropped);
            }
        };
        match convert::convert_frame(frame, buffer.bits, buffer.stride_bytes) {
            Ok(()) => Ok(PresentOutcome::Presented),
            Err(e) => {
                tracing::warn!("frame conversion failed: {e:#}");
                Ok(PresentOutcome::Dropped)
            }
        }
    }

    /// Give the surface back, e.g. so a caller can reuse it for another session.
    pub fn into_surface(self) -> Box<dyn Surface> {
        self.surface
    }
}

/// Sleep for `delay` in slices of at most `slice`, returning early on abort.
///
/// Returns `false` if abort was observed.
pub fn pace(control: &PlaybackControl, delay: Duration, slice: Duration) -> bool {
    let deadline = Instant::now() + delay;
    let slice = slice.max(Duration::from_millis(1));
    loop {
        if control.abort_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(slice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{MemorySurface, SurfaceBuffer};
    use anyhow::anyhow;

    #[test]
    fn delay_at_thirty_fps() {
        assert_eq!(frame_delay(30.0, 1.0), Duration::from_micros(33_333));
    }

    #[test]
    fn double_speed_halves_delay() {
        let normal = frame_delay(30.0, 1.0).as_micros() as i64;
        let fast = frame_delay(30.0, 2.0).as_micros() as i64;
        assert!((normal / 2 - fast).abs() <= 1);
    }

    #[test]
    fn tiny_speed_clamps_instead_of_exploding() {
        assert_eq!(frame_delay(30.0, 0.001), frame_delay(30.0, MIN_PACING_SPEED));
        assert_eq!(frame_delay(30.0, 0.001), Duration::from_micros(3_333_333));
    }

    #[test]
    fn unknown_rate_uses_fallback_and_floor_applies() {
        assert_eq!(frame_delay(0.0, 1.0), FALLBACK_FRAME_DELAY);
        assert_eq!(frame_delay(0.005, 1.0), FALLBACK_FRAME_DELAY);
        assert_eq!(frame_delay(10_000.0, 4.0), MIN_FRAME_DELAY);
    }

    #[test]
    fn speed_three_renders_every_third_frame() {
        let mut skipper = FrameSkipper::new();
        let rendered: Vec<u32> = (0..10).filter(|_| skipper.should_render(3.0)).collect();
        assert_eq!(rendered, vec![0, 3, 6, 9]);
    }

    #[test]
    fn normal_and_slow_speed_render_everything() {
        let mut skipper = FrameSkipper::new();
        assert!((0..10).all(|_| skipper.should_render(1.0)));
        assert!((0..10).all(|_| skipper.should_render(0.5)));
    }

    #[test]
    fn fractional_speed_uses_floor() {
        let mut skipper = FrameSkipper::new();
        let rendered: Vec<u32> = (0..6).filter(|_| skipper.should_render(2.9)).collect();
        assert_eq!(rendered, vec![0, 2, 4]);
    }

    #[test]
    fn reset_restarts_phase() {
        let mut skipper = FrameSkipper::new();
        skipper.should_render(3.0);
        skipper.reset();
        assert!(skipper.should_render(3.0));
    }

    #[test]
    fn renderer_honours_padded_stride() {
        let surface = MemorySurface::with_row_padding(8);
        let front = surface.handle();
        let mut renderer = Renderer::new(Box::new(surface), 2, 2).unwrap();
        let outcome = renderer.present(&RawFrame::black(2, 2)).unwrap();
        assert_eq!(outcome, PresentOutcome::Presented);

        let front = front.lock().unwrap();
        assert_eq!(front.stride_bytes, 16);
        for row in 0..2 {
            let base = row * 16;
            assert_eq!(&front.pixels[base..base + 8], &[0, 0, 0, 255, 0, 0, 0, 255]);
            assert!(front.pixels[base + 8..base + 16].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn mismatched_frame_is_dropped_but_surface_released() {
        let surface = MemorySurface::new();
        let front = surface.handle();
        let mut renderer = Renderer::new(Box::new(surface), 4, 4).unwrap();
        let outcome = renderer.present(&RawFrame::black(2, 2)).unwrap();
        assert_eq!(outcome, PresentOutcome::Dropped);
        assert_eq!(front.lock().unwrap().presents, 1);
        assert_eq!(
            renderer.present(&RawFrame::black(4, 4)).unwrap(),
            PresentOutcome::Presented
        );
    }

    struct BrokenSurface;

    impl Surface for BrokenSurface {
        fn set_geometry(&mut self, _: u32, _: u32, _: PixelFormat) -> Result<()> {
            Ok(())
        }
        fn lock(&mut self) -> Result<()> {
            Err(anyhow!("window gone"))
        }
        fn buffer(&mut self) -> Result<SurfaceBuffer<'_>> {
            Err(anyhow!("not locked"))
        }
        fn unlock_and_present(&mut self) {}
    }

    #[test]
    fn lock_failure_is_an_error() {
        let mut renderer = Renderer::new(Box::new(BrokenSurface), 2, 2).unwrap();
        let err = renderer.present(&RawFrame::black(2, 2)).unwrap_err();
        assert!(format!("{err:#}").contains("lock surface"));
    }

    #[test]
    fn pace_returns_early_on_abort() {
        let control = PlaybackControl::default();
        control.request_abort();
        let started = Instant::now();
        assert!(!pace(&control, Duration::from_secs(5), Duration::from_millis(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn pace_sleeps_full_delay() {
        let control = PlaybackControl::default();
        let started = Instant::now();
        assert!(pace(&control, Duration::from_millis(30), Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
