//! FFmpeg container and decoder backend.
//!
//! Packets are copied out of the demuxer so the extraction and decode stages can
//! own them on different threads. Pictures in any pixel format are converted to
//! planar 4:2:0 before they leave the decoder.

use std::path::Path;
use std::sync::Once;

use anyhow::{Context, Result, anyhow, bail};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;

use super::{Container, Decoder, MediaBackend, Packet, StreamInfo, StreamKind};
use crate::frame::{self, RawFrame};

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() -> Result<()> {
    let mut result = Ok(());
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            result = Err(anyhow!("ffmpeg initialization failed: {e}"));
            return;
        }
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    });
    result
}

/// Opens anything libavformat can demux.
#[derive(Debug)]
pub struct FfmpegBackend {
    _initialized: (),
}

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        init_ffmpeg()?;
        Ok(Self { _initialized: () })
    }
}

impl MediaBackend for FfmpegBackend {
    fn open(&self, uri: &Path) -> Result<Box<dyn Container>> {
        let input = ffmpeg::format::input(&uri).with_context(|| format!("open {:?}", uri))?;
        let streams = input.streams().map(|s| stream_info(&s)).collect();
        Ok(Box::new(FfmpegContainer { input, streams }))
    }
}

fn stream_info(stream: &ffmpeg::format::stream::Stream<'_>) -> StreamInfo {
    let kind = match stream.parameters().medium() {
        ffmpeg::media::Type::Video => StreamKind::Video,
        ffmpeg::media::Type::Audio => StreamKind::Audio,
        _ => StreamKind::Other,
    };
    let (width, height) = match kind {
        StreamKind::Video => match open_video_decoder(stream) {
            Ok(decoder) => (decoder.width(), decoder.height()),
            Err(e) => {
                tracing::warn!(stream = stream.index(), "video stream has no usable decoder: {e:#}");
                (0, 0)
            }
        },
        _ => (0, 0),
    };
    let time_base = stream.time_base();
    StreamInfo {
        index: stream.index(),
        kind,
        width,
        height,
        frame_rate: positive_rate(stream.avg_frame_rate()).or_else(|| positive_rate(stream.rate())),
        time_base: (time_base.denominator() != 0)
            .then(|| (time_base.numerator() as i64, time_base.denominator() as i64)),
    }
}

fn positive_rate(rate: ffmpeg::Rational) -> Option<f64> {
    (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate))
}

fn open_video_decoder(stream: &ffmpeg::format::stream::Stream<'_>) -> Result<ffmpeg::decoder::Video> {
    let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .context("read codec parameters")?;
    context.decoder().video().context("open video decoder")
}

pub struct FfmpegContainer {
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamInfo>,
}

// SAFETY: the demuxer context is only ever used by the thread that owns the container.
unsafe impl Send for FfmpegContainer {}

impl Container for FfmpegContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_unit(&mut self) -> Result<Option<Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(e) => return Err(e).context("read packet"),
        }
        Ok(Some(Packet {
            stream_index: packet.stream(),
            pts: packet.pts(),
            data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
        }))
    }

    /// Seek to the keyframe at or before `frame`.
    fn seek_to_frame(&mut self, stream: usize, frame: u64) -> Result<bool> {
        let info = self
            .streams
            .get(stream)
            .ok_or_else(|| anyhow!("no stream {stream}"))?;
        let Some(fps) = info.frame_rate else {
            return Ok(false);
        };
        // AV_TIME_BASE units
        let micros = (frame as f64 * 1_000_000.0 / fps).round() as i64;
        self.input
            .seek(micros, ..micros)
            .with_context(|| format!("seek to frame {frame}"))?;
        Ok(true)
    }

    fn decoder(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        if stream.kind != StreamKind::Video {
            bail!("stream {} is not a video stream", stream.index);
        }
        let source = self
            .input
            .stream(stream.index)
            .ok_or_else(|| anyhow!("no stream {}", stream.index))?;
        let decoder = open_video_decoder(&source)?;
        Ok(Box::new(FfmpegDecoder {
            width: decoder.width(),
            height: decoder.height(),
            decoder,
            scaler: None,
        }))
    }
}

pub struct FfmpegDecoder {
    decoder: ffmpeg::decoder::Video,
    scaler: Option<scaling::Context>,
    width: u32,
    height: u32,
}

// SAFETY: the codec and scaler contexts are only touched by the decode thread.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    fn receive_all(&mut self) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        let mut picture = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut picture) {
                Ok(()) => frames.push(self.to_raw(&picture)?),
                Err(ffmpeg::Error::Eof) => break,
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(e) => return Err(e).context("receive frame"),
            }
        }
        Ok(frames)
    }

    fn to_raw(&mut self, picture: &ffmpeg::frame::Video) -> Result<RawFrame> {
        if (picture.width(), picture.height()) != (self.width, self.height) {
            bail!(
                "picture size changed to {}x{} (stream is {}x{})",
                picture.width(),
                picture.height(),
                self.width,
                self.height
            );
        }
        if picture.format() == Pixel::YUV420P {
            return pack_planes(picture);
        }

        let scaler = match self.scaler.take() {
            Some(scaler) if scaler.input().format == picture.format() => scaler,
            _ => scaling::Context::get(
                picture.format(),
                self.width,
                self.height,
                Pixel::YUV420P,
                self.width,
                self.height,
                scaling::Flags::BILINEAR,
            )
            .context("create pixel format converter")?,
        };
        let scaler = self.scaler.insert(scaler);
        let mut converted = ffmpeg::frame::Video::empty();
        scaler
            .run(picture, &mut converted)
            .context("convert picture to yuv420p")?;
        pack_planes(&converted)
    }
}

impl Decoder for FfmpegDecoder {
    fn decode(&mut self, packet: Packet) -> Result<Vec<RawFrame>> {
        if packet.data.is_empty() {
            return Ok(Vec::new());
        }
        let mut unit = ffmpeg::Packet::copy(&packet.data);
        unit.set_pts(packet.pts);
        self.decoder.send_packet(&unit).context("send packet")?;
        self.receive_all()
    }

    fn reset(&mut self) {
        self.decoder.flush();
    }

    fn drain(&mut self) -> Result<Vec<RawFrame>> {
        self.decoder.send_eof().context("signal end of stream")?;
        self.receive_all()
    }
}

/// Copy the three planes of a 4:2:0 picture into one tightly packed buffer.
fn pack_planes(picture: &ffmpeg::frame::Video) -> Result<RawFrame> {
    let width = picture.width() as usize;
    let height = picture.height() as usize;
    let planes = [(width, height), (width / 2, height / 2), (width / 2, height / 2)];
    let mut data = Vec::with_capacity(frame::frame_size(picture.width(), picture.height()));
    for (plane, (row_len, rows)) in planes.into_iter().enumerate() {
        let stride = picture.stride(plane);
        let bytes = picture.data(plane);
        for row in 0..rows {
            let start = row * stride;
            let line = bytes
                .get(start..start + row_len)
                .ok_or_else(|| anyhow!("plane {plane} ends before row {row}"))?;
            data.extend_from_slice(line);
        }
    }
    RawFrame::new(picture.width(), picture.height(), data)
}
