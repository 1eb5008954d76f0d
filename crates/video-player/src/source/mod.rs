//! Frame sources and the container/decoder boundary they sit on.
//!
//! Two variants feed the render stage:
//! - [`precomputed`]: a flat file of raw 4:2:0 frames, seekable by arithmetic
//! - [`live`]: a container read by an extraction thread and decoded by a second thread
//!
//! Container parsing and decoding are reached through [`MediaBackend`]; [`y4m`]
//! provides a backend for uncompressed YUV4MPEG2 streams, and `ffmpeg` (behind the
//! `ffmpeg` feature) demuxes and decodes compressed media.

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(not(feature = "ffmpeg"))]
use anyhow::anyhow;
use anyhow::Result;

use crate::frame::{self, RawFrame};

pub mod export;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod live;
pub mod precomputed;
pub mod y4m;

/// What a session should play.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceDescriptor {
    /// Headerless file of concatenated 4:2:0 frames; dimensions supplied by the caller.
    Precomputed {
        path: PathBuf,
        width: u32,
        height: u32,
        frame_rate: Option<f64>,
    },
    /// A container opened through the player's [`MediaBackend`].
    Live { uri: PathBuf },
}

impl SourceDescriptor {
    pub fn precomputed(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self::Precomputed {
            path: path.into(),
            width,
            height,
            frame_rate: None,
        }
    }

    pub fn live(uri: impl Into<PathBuf>) -> Self {
        Self::Live { uri: uri.into() }
    }
}

/// One compressed (or raw) unit read from a container.
#[derive(Clone, Debug)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in stream time-base units.
    pub pts: Option<i64>,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

/// Stream facts reported by a container.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
    /// `(numerator, denominator)` seconds per pts tick.
    pub time_base: Option<(i64, i64)>,
}

impl StreamInfo {
    /// Convert a pts in this stream's time base to milliseconds.
    pub fn pts_to_ms(&self, pts: i64) -> Option<u64> {
        let (num, den) = self.time_base?;
        if den == 0 || pts < 0 {
            return None;
        }
        let ms = (pts as i128 * num as i128 * 1000) / den as i128;
        u64::try_from(ms).ok()
    }
}

/// An opened container.
pub trait Container: Send {
    fn streams(&self) -> &[StreamInfo];

    /// Read the next unit in file order. `Ok(None)` marks end of stream.
    fn read_unit(&mut self) -> Result<Option<Packet>>;

    /// Reposition so the next unit read from `stream` is frame `frame`.
    ///
    /// Returns `Ok(false)` when the container cannot seek.
    fn seek_to_frame(&mut self, stream: usize, frame: u64) -> Result<bool> {
        let _ = (stream, frame);
        Ok(false)
    }

    /// Build a decoder for one of this container's streams.
    fn decoder(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>>;
}

/// Turns units of one stream into raw frames.
pub trait Decoder: Send {
    /// Feed one unit and return every frame the decoder is ready to emit.
    fn decode(&mut self, packet: Packet) -> Result<Vec<RawFrame>>;

    /// Drop any internal state, e.g. after a seek.
    fn reset(&mut self) {}

    /// Emit frames still buffered at end of stream.
    fn drain(&mut self) -> Result<Vec<RawFrame>> {
        Ok(Vec::new())
    }
}

/// Opens containers.
pub trait MediaBackend: Send + Sync {
    fn open(&self, uri: &Path) -> Result<Box<dyn Container>>;
}

/// Backend for `uri`: `.y4m` files use [`y4m::Y4mBackend`], anything else needs FFmpeg.
pub fn backend_for(uri: &Path) -> Result<Arc<dyn MediaBackend>> {
    let is_y4m = uri
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("y4m"));
    if is_y4m {
        return Ok(Arc::new(y4m::Y4mBackend));
    }
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Arc::new(ffmpeg::FfmpegBackend::new()?))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(anyhow!(
            "{:?} is not a .y4m file and this build has no FFmpeg support",
            uri
        ))
    }
}

/// First video stream of `container`, if any.
pub fn first_video_stream(container: &dyn Container) -> Option<StreamInfo> {
    container
        .streams()
        .iter()
        .find(|s| s.kind == StreamKind::Video)
        .cloned()
}

/// Number of whole frames in a precomputed file, or 0 when it cannot be determined.
pub fn total_frames(path: &Path, width: u32, height: u32) -> u64 {
    let frame_size = frame::frame_size(width, height) as u64;
    if frame_size == 0 {
        return 0;
    }
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() / frame_size,
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot stat frame file: {e}");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pts_to_ms_uses_time_base() {
        let info = StreamInfo {
            index: 0,
            kind: StreamKind::Video,
            width: 2,
            height: 2,
            frame_rate: Some(25.0),
            time_base: Some((1, 25)),
        };
        assert_eq!(info.pts_to_ms(50), Some(2000));
        assert_eq!(info.pts_to_ms(-1), None);
    }

    #[test]
    fn pts_to_ms_without_time_base() {
        let info = StreamInfo {
            index: 0,
            kind: StreamKind::Video,
            width: 2,
            height: 2,
            frame_rate: None,
            time_base: None,
        };
        assert_eq!(info.pts_to_ms(10), None);
    }

    #[test]
    fn total_frames_counts_whole_frames() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 6 * 3 + 4]).unwrap();
        file.flush().unwrap();
        assert_eq!(total_frames(file.path(), 2, 2), 3);
    }

    #[test]
    fn backend_is_chosen_by_extension() {
        let clip = y4m::TestClip::new(2, 2, 25, &y4m::numbered_frames(1));
        let backend = backend_for(clip.path()).unwrap();
        let container = backend.open(clip.path()).unwrap();
        assert_eq!(container.streams()[0].frame_rate, Some(25.0));
        #[cfg(not(feature = "ffmpeg"))]
        assert!(backend_for(Path::new("movie.mp4")).is_err());
    }

    #[test]
    fn total_frames_is_zero_when_indeterminate() {
        assert_eq!(total_frames(Path::new("/no/such/file.yuv"), 2, 2), 0);
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(total_frames(file.path(), 0, 2), 0);
    }
}
