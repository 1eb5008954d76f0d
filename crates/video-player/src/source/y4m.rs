//! YUV4MPEG2 container backend.
//!
//! Each `FRAME` chunk becomes one [`Packet`] whose payload is already a raw
//! 4:2:0 picture, so decoding is a length check. Only 4:2:0 chroma layouts are
//! accepted.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};

use super::{Container, Decoder, MediaBackend, Packet, StreamInfo, StreamKind};
use crate::frame::{self, RawFrame};

const MAGIC: &str = "YUV4MPEG2";
const FRAME_TAG: &[u8] = b"FRAME";
const BARE_FRAME_HEADER: &[u8] = b"FRAME\n";

/// Opens `.y4m` files.
#[derive(Clone, Copy, Debug, Default)]
pub struct Y4mBackend;

impl MediaBackend for Y4mBackend {
    fn open(&self, uri: &Path) -> Result<Box<dyn Container>> {
        let file = File::open(uri).with_context(|| format!("open {:?}", uri))?;
        let container = Y4mContainer::new(BufReader::new(file))
            .with_context(|| format!("read y4m header {:?}", uri))?;
        Ok(Box::new(container))
    }
}

/// Stream header fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Y4mHeader {
    pub width: u32,
    pub height: u32,
    pub rate_num: u32,
    pub rate_den: u32,
}

impl Y4mHeader {
    /// Parse the header line without its trailing newline.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(MAGIC) {
            bail!("missing {MAGIC} signature");
        }
        let mut width = None;
        let mut height = None;
        let mut rate = None;
        for token in tokens {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => width = Some(value.parse::<u32>().context("bad width")?),
                Some('H') => height = Some(value.parse::<u32>().context("bad height")?),
                Some('F') => rate = Some(parse_ratio(value).context("bad frame rate")?),
                Some('C') if !value.starts_with("420") => {
                    bail!("unsupported chroma layout C{value}; only 4:2:0 is handled")
                }
                _ => {}
            }
        }
        let width = width.ok_or_else(|| anyhow!("header has no width"))?;
        let height = height.ok_or_else(|| anyhow!("header has no height"))?;
        frame::validate_dimensions(width, height)?;
        let (rate_num, rate_den) = rate.unwrap_or((25, 1));
        Ok(Self {
            width,
            height,
            rate_num,
            rate_den,
        })
    }

    pub fn frame_rate(&self) -> f64 {
        self.rate_num as f64 / self.rate_den as f64
    }

    /// Render back to a header line, newline included.
    pub fn to_line(&self) -> String {
        format!(
            "{MAGIC} W{} H{} F{}:{} Ip A1:1 C420jpeg\n",
            self.width, self.height, self.rate_num, self.rate_den
        )
    }
}

fn parse_ratio(value: &str) -> Result<(u32, u32)> {
    let (num, den) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("expected num:den, got {value}"))?;
    let num = num.parse::<u32>()?;
    let den = den.parse::<u32>()?;
    if num == 0 || den == 0 {
        bail!("frame rate {num}:{den} is not positive");
    }
    Ok((num, den))
}

/// Reader over one YUV4MPEG2 stream.
pub struct Y4mContainer<R> {
    reader: R,
    streams: Vec<StreamInfo>,
    frame_size: usize,
    data_start: u64,
    next_index: u64,
}

impl<R: BufRead + Seek> Y4mContainer<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        if line.last() != Some(&b'\n') {
            bail!("truncated stream header");
        }
        let text = std::str::from_utf8(&line[..line.len() - 1]).context("header is not ASCII")?;
        let header = Y4mHeader::parse(text)?;
        let streams = vec![StreamInfo {
            index: 0,
            kind: StreamKind::Video,
            width: header.width,
            height: header.height,
            frame_rate: Some(header.frame_rate()),
            time_base: Some((header.rate_den as i64, header.rate_num as i64)),
        }];
        tracing::debug!(
            width = header.width,
            height = header.height,
            fps = header.frame_rate(),
            "y4m stream opened"
        );
        Ok(Self {
            reader,
            frame_size: frame::frame_size(header.width, header.height),
            streams,
            data_start: line.len() as u64,
            next_index: 0,
        })
    }
}

impl<R: BufRead + Seek + Send> Container for Y4mContainer<R> {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_unit(&mut self) -> Result<Option<Packet>> {
        let mut line = Vec::new();
        let n = self.reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if !line.starts_with(FRAME_TAG) || line.last() != Some(&b'\n') {
            bail!("malformed frame header at frame {}", self.next_index);
        }
        let mut data = vec![0u8; self.frame_size];
        match self.reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!(frame = self.next_index, "truncated final frame ignored");
                return Ok(None);
            }
            Err(e) => return Err(e).context("read frame payload"),
        }
        let pts = self.next_index as i64;
        self.next_index += 1;
        Ok(Some(Packet {
            stream_index: 0,
            pts: Some(pts),
            data,
        }))
    }

    /// Seek by arithmetic, assuming every frame header is a bare `FRAME\n`.
    fn seek_to_frame(&mut self, stream: usize, frame: u64) -> Result<bool> {
        if stream != 0 {
            bail!("no stream {stream}");
        }
        let chunk = (BARE_FRAME_HEADER.len() + self.frame_size) as u64;
        let offset = frame
            .checked_mul(chunk)
            .and_then(|o| o.checked_add(self.data_start))
            .ok_or_else(|| anyhow!("frame {frame} is out of range"))?;
        self.reader.seek(SeekFrom::Start(offset))?;

        let mut tag = [0u8; 6];
        match self.reader.read_exact(&mut tag) {
            Ok(()) if tag == BARE_FRAME_HEADER => {
                self.reader.seek(SeekFrom::Start(offset))?;
            }
            Ok(()) => {
                bail!("frame headers carry parameters; cannot seek by offset");
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.reader.seek(SeekFrom::End(0))?;
            }
            Err(e) => return Err(e).context("probe frame header"),
        }
        self.next_index = frame;
        Ok(true)
    }

    fn decoder(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        if stream.kind != StreamKind::Video {
            bail!("stream {} is not a video stream", stream.index);
        }
        Ok(Box::new(PassthroughDecoder {
            width: stream.width,
            height: stream.height,
        }))
    }
}

/// Decoder for payloads that are already raw frames.
pub struct PassthroughDecoder {
    width: u32,
    height: u32,
}

impl Decoder for PassthroughDecoder {
    fn decode(&mut self, packet: Packet) -> Result<Vec<RawFrame>> {
        Ok(vec![RawFrame::new(self.width, self.height, packet.data)?])
    }
}

/// Serialise frames into an in-memory YUV4MPEG2 stream.
#[cfg(test)]
pub(crate) fn encode(width: u32, height: u32, fps: u32, frames: &[RawFrame]) -> Vec<u8> {
    let header = Y4mHeader {
        width,
        height,
        rate_num: fps,
        rate_den: 1,
    };
    let mut out = header.to_line().into_bytes();
    for frame in frames {
        out.extend_from_slice(BARE_FRAME_HEADER);
        out.extend_from_slice(frame.data());
    }
    out
}

/// `count` 2x2 frames whose luma bytes all equal the frame index.
#[cfg(test)]
pub(crate) fn numbered_frames(count: u8) -> Vec<RawFrame> {
    (0..count)
        .map(|n| RawFrame::new(2, 2, vec![n, n, n, n, 128, 128]).unwrap())
        .collect()
}

/// A YUV4MPEG2 file in a temporary directory.
#[cfg(test)]
pub(crate) struct TestClip {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
}

#[cfg(test)]
impl TestClip {
    pub(crate) fn new(width: u32, height: u32, fps: u32, frames: &[RawFrame]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.y4m");
        std::fs::write(&path, encode(width, height, fps, frames)).unwrap();
        Self { _dir: dir, path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn container(frames: u8) -> Y4mContainer<Cursor<Vec<u8>>> {
        let bytes = encode(2, 2, 25, &numbered_frames(frames));
        Y4mContainer::new(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn header_parses_dimensions_and_rate() {
        let h = Y4mHeader::parse("YUV4MPEG2 W320 H240 F30000:1001 It A1:1 C420mpeg2").unwrap();
        assert_eq!((h.width, h.height), (320, 240));
        assert!((h.frame_rate() - 29.97).abs() < 0.01);
    }

    #[test]
    fn header_defaults_rate_and_rejects_other_chroma() {
        let h = Y4mHeader::parse("YUV4MPEG2 W4 H4").unwrap();
        assert_eq!(h.frame_rate(), 25.0);
        assert!(Y4mHeader::parse("YUV4MPEG2 W4 H4 C444").is_err());
        assert!(Y4mHeader::parse("MPEG W4 H4").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 W4").is_err());
        assert!(Y4mHeader::parse("YUV4MPEG2 W4 H4 F0:1").is_err());
    }

    #[test]
    fn reads_frames_in_order_with_pts() {
        let mut c = container(3);
        let info = c.streams()[0].clone();
        assert_eq!(info.frame_rate, Some(25.0));
        for n in 0..3 {
            let packet = c.read_unit().unwrap().unwrap();
            assert_eq!(packet.pts, Some(n as i64));
            assert_eq!(packet.data[0], n);
        }
        assert!(c.read_unit().unwrap().is_none());
        assert_eq!(info.pts_to_ms(25), Some(1000));
    }

    #[test]
    fn seek_lands_on_requested_frame() {
        let mut c = container(5);
        c.read_unit().unwrap();
        assert!(c.seek_to_frame(0, 3).unwrap());
        let packet = c.read_unit().unwrap().unwrap();
        assert_eq!(packet.pts, Some(3));
        assert_eq!(packet.data[0], 3);
    }

    #[test]
    fn seek_past_end_yields_end_of_stream() {
        let mut c = container(2);
        assert!(c.seek_to_frame(0, 10).unwrap());
        assert!(c.read_unit().unwrap().is_none());
    }

    #[test]
    fn seek_refuses_parameterised_frame_headers() {
        let mut bytes = b"YUV4MPEG2 W2 H2 F25:1\n".to_vec();
        for n in 0..2u8 {
            bytes.extend_from_slice(b"FRAME Ixyz\n");
            bytes.extend_from_slice(&[n, n, n, n, 128, 128]);
        }
        let mut c = Y4mContainer::new(Cursor::new(bytes)).unwrap();
        assert!(c.seek_to_frame(0, 1).is_err());
    }

    #[test]
    fn truncated_last_frame_ends_stream() {
        let mut bytes = encode(2, 2, 25, &numbered_frames(1));
        bytes.extend_from_slice(b"FRAME\n\x01\x02");
        let mut c = Y4mContainer::new(Cursor::new(bytes)).unwrap();
        assert!(c.read_unit().unwrap().is_some());
        assert!(c.read_unit().unwrap().is_none());
    }

    #[test]
    fn passthrough_decoder_checks_length() {
        let c = container(1);
        let mut decoder = c.decoder(&c.streams()[0]).unwrap();
        let frames = decoder
            .decode(Packet {
                stream_index: 0,
                pts: Some(0),
                data: vec![9; 6],
            })
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert!(decoder
            .decode(Packet {
                stream_index: 0,
                pts: Some(1),
                data: vec![9; 5],
            })
            .is_err());
    }

    #[test]
    fn backend_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.y4m");
        std::fs::write(&path, encode(2, 2, 30, &numbered_frames(2))).unwrap();
        let mut c = Y4mBackend.open(&path).unwrap();
        assert_eq!(c.streams()[0].frame_rate, Some(30.0));
        assert!(c.read_unit().unwrap().is_some());
        assert!(Y4mBackend.open(&dir.path().join("missing.y4m")).is_err());
    }
}
