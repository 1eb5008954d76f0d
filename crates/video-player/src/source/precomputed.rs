//! Flat-file frame store.
//!
//! Frame `n` lives at byte offset `n * frame_size`; there is no header and the
//! dimensions come from the caller.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::frame::{self, RawFrame};
use crate::render::{self, FrameSkipper, Renderer};
use crate::state::PlaybackControl;

/// File handle shared between the render loop and seek requests.
///
/// Position and handle validity are read under one lock.
pub struct FrameFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
    frame_size: usize,
}

impl FrameFile {
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self> {
        frame::validate_dimensions(width, height)?;
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            frame_size: frame::frame_size(width, height),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the cursor to the start of frame `index`.
    pub fn seek_to_frame(&self, index: u64) -> Result<()> {
        let offset = index
            .checked_mul(self.frame_size as u64)
            .ok_or_else(|| anyhow!("frame {index} is out of range"))?;
        let mut guard = self.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| anyhow!("frame file {:?} is closed", self.path))?;
        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seek to frame {index}"))?;
        Ok(())
    }

    /// Read one frame into `buf`, which must be `frame_size` bytes.
    ///
    /// Returns `Ok(false)` on a short read, including a clean end of file.
    pub fn read_frame(&self, buf: &mut [u8]) -> Result<bool> {
        let mut guard = self.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| anyhow!("frame file {:?} is closed", self.path))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("read frame"),
            }
        }
        Ok(filled == buf.len())
    }

    /// Drop the file handle; later reads and seeks fail.
    pub fn close(&self) {
        self.lock().take();
    }
}

/// Precomputed frame source bound to one render surface.
pub struct PrecomputedSource {
    file: FrameFile,
    width: u32,
    height: u32,
    next_frame: u64,
}

impl PrecomputedSource {
    /// Open `path` and apply any seek already pending in `control`.
    pub fn open(path: &Path, width: u32, height: u32, control: &PlaybackControl) -> Result<Self> {
        let file = FrameFile::open(path, width, height)?;
        let mut next_frame = 0;
        if let Some(target) = control.take_seek() {
            match file.seek_to_frame(target as u64) {
                Ok(()) => {
                    tracing::info!(frame = target, "initial seek applied");
                    next_frame = target as u64;
                }
                Err(e) => {
                    tracing::warn!("initial seek to frame {target} failed, starting at 0: {e:#}");
                    file.seek_to_frame(0)?;
                }
            }
        }
        control.set_current_frame(next_frame as i64);
        Ok(Self {
            file,
            width,
            height,
            next_frame,
        })
    }

    /// Run the render loop on a dedicated thread.
    pub fn spawn(
        self,
        renderer: Renderer,
        control: Arc<PlaybackControl>,
        pause_poll: Duration,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("precomputed-render".into())
            .spawn(move || self.run(renderer, &control, pause_poll))
            .context("spawn precomputed render thread")
    }

    /// Render frames until end of file, a fatal render error or abort.
    pub fn run(mut self, mut renderer: Renderer, control: &PlaybackControl, pause_poll: Duration) {
        let mut frame = RawFrame::black(self.width, self.height);
        let mut skipper = FrameSkipper::new();
        let mut rendered = 0u64;

        while !control.abort_requested() {
            if let Some(target) = control.take_seek() {
                match self.file.seek_to_frame(target as u64) {
                    Ok(()) => {
                        self.next_frame = target as u64;
                        control.set_current_frame(target);
                        skipper.reset();
                        tracing::info!(frame = target, "seek applied");
                    }
                    Err(e) => tracing::warn!("seek to frame {target} failed: {e:#}"),
                }
            }

            if control.is_paused() {
                thread::sleep(pause_poll);
                continue;
            }

            match self.file.read_frame(frame.data_mut()) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(frame = self.next_frame, "end of frame file");
                    break;
                }
                Err(e) => {
                    tracing::error!("frame read failed: {e:#}");
                    break;
                }
            }
            control.set_current_frame(self.next_frame as i64);
            self.next_frame += 1;

            let speed = control.speed();
            if !skipper.should_render(speed) {
                continue;
            }

            if let Err(e) = renderer.present(&frame) {
                tracing::error!("render stopped: {e:#}");
                break;
            }
            rendered += 1;

            let delay = render::frame_delay(control.frame_rate(), speed);
            if !render::pace(control, delay, pause_poll) {
                break;
            }
        }

        self.file.close();
        control.set_playing(false);
        tracing::info!(rendered, "precomputed render loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{MemorySurface, PixelFormat, Surface, SurfaceBuffer};
    use std::io::Write;

    fn patterned_file(frames: usize, frame_size: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..frames * frame_size).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn seek_reads_exact_byte_range() {
        let frame_size = frame::frame_size(320, 240);
        assert_eq!(frame_size, 115_200);
        let file = patterned_file(12, frame_size);
        let store = FrameFile::open(file.path(), 320, 240).unwrap();

        store.seek_to_frame(10).unwrap();
        let mut buf = vec![0u8; frame_size];
        assert!(store.read_frame(&mut buf).unwrap());

        let expected: Vec<u8> = (1_152_000..1_267_200).map(|i| (i % 251) as u8).collect();
        assert_eq!(buf, expected);
    }

    #[test]
    fn short_read_is_end_of_stream() {
        let frame_size = frame::frame_size(2, 2);
        let mut file = patterned_file(1, frame_size);
        file.write_all(&[1, 2]).unwrap();
        file.flush().unwrap();
        let store = FrameFile::open(file.path(), 2, 2).unwrap();
        let mut buf = vec![0u8; frame_size];
        assert!(store.read_frame(&mut buf).unwrap());
        assert!(!store.read_frame(&mut buf).unwrap());
    }

    #[test]
    fn closed_file_rejects_io() {
        let file = patterned_file(1, 6);
        let store = FrameFile::open(file.path(), 2, 2).unwrap();
        store.close();
        assert!(store.seek_to_frame(0).is_err());
        assert!(store.read_frame(&mut [0u8; 6]).is_err());
    }

    #[test]
    fn open_rejects_bad_dimensions_and_missing_file() {
        let file = patterned_file(1, 6);
        assert!(FrameFile::open(file.path(), 3, 2).is_err());
        assert!(FrameFile::open(Path::new("/no/such/frames.yuv"), 2, 2).is_err());
    }

    fn fast_control() -> Arc<PlaybackControl> {
        let control = PlaybackControl::shared(1000.0);
        control.set_playing(true);
        control
    }

    #[test]
    fn plays_every_frame_then_goes_idle() {
        let file = patterned_file(5, 6);
        let control = fast_control();
        let surface = MemorySurface::new();
        let front = surface.handle();
        let renderer = Renderer::new(Box::new(surface), 2, 2).unwrap();

        let source = PrecomputedSource::open(file.path(), 2, 2, &control).unwrap();
        source.run(renderer, &control, Duration::from_millis(5));

        assert_eq!(front.lock().unwrap().presents, 5);
        assert_eq!(control.current_frame(), 4);
        assert!(!control.is_playing());
    }

    #[test]
    fn pending_seek_applies_before_first_read() {
        let file = patterned_file(5, 6);
        let control = fast_control();
        control.request_seek(3);
        let surface = MemorySurface::new();
        let front = surface.handle();
        let renderer = Renderer::new(Box::new(surface), 2, 2).unwrap();

        let source = PrecomputedSource::open(file.path(), 2, 2, &control).unwrap();
        assert_eq!(control.current_frame(), 3);
        source.run(renderer, &control, Duration::from_millis(5));

        assert_eq!(front.lock().unwrap().presents, 2);
        assert_eq!(control.current_frame(), 4);
    }

    #[test]
    fn fast_playback_skips_frames() {
        let file = patterned_file(10, 6);
        let control = fast_control();
        control.set_speed(3.0);
        let surface = MemorySurface::new();
        let front = surface.handle();
        let renderer = Renderer::new(Box::new(surface), 2, 2).unwrap();

        PrecomputedSource::open(file.path(), 2, 2, &control)
            .unwrap()
            .run(renderer, &control, Duration::from_millis(5));

        assert_eq!(front.lock().unwrap().presents, 4);
        assert_eq!(control.current_frame(), 9);
    }

    #[test]
    fn paused_loop_exits_on_abort() {
        let file = patterned_file(5, 6);
        let control = fast_control();
        control.set_paused(true);
        let surface = MemorySurface::new();
        let front = surface.handle();
        let renderer = Renderer::new(Box::new(surface), 2, 2).unwrap();
        let source = PrecomputedSource::open(file.path(), 2, 2, &control).unwrap();
        let handle = source
            .spawn(renderer, control.clone(), Duration::from_millis(5))
            .unwrap();

        thread::sleep(Duration::from_millis(30));
        control.request_abort();
        handle.join().unwrap();

        assert_eq!(front.lock().unwrap().presents, 0);
        assert!(!control.is_playing());
    }

    struct FailingLock;

    impl Surface for FailingLock {
        fn set_geometry(&mut self, _: u32, _: u32, _: PixelFormat) -> Result<()> {
            Ok(())
        }
        fn lock(&mut self) -> Result<()> {
            Err(anyhow!("surface lost"))
        }
        fn buffer(&mut self) -> Result<SurfaceBuffer<'_>> {
            Err(anyhow!("not locked"))
        }
        fn unlock_and_present(&mut self) {}
    }

    #[test]
    fn lock_failure_ends_the_loop() {
        let file = patterned_file(5, 6);
        let control = fast_control();
        let renderer = Renderer::new(Box::new(FailingLock), 2, 2).unwrap();
        PrecomputedSource::open(file.path(), 2, 2, &control)
            .unwrap()
            .run(renderer, &control, Duration::from_millis(5));
        assert_eq!(control.current_frame(), 0);
        assert!(!control.is_playing());
    }
}
