//! Live frame source: an extraction thread feeding a decode/render thread.
//!
//! The extraction stage reads container units in file order and queues only the
//! video stream. It always finishes by queueing [`StreamItem::End`], so the decode
//! stage sees a clean end of stream rather than waiting forever.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use super::{Container, Decoder, MediaBackend, Packet, StreamInfo, first_video_stream};
use crate::frame;
use crate::queue::WorkQueue;
use crate::render::{self, FrameSkipper, Renderer};
use crate::state::PlaybackControl;

/// Items passed from extraction to decode.
#[derive(Debug)]
pub enum StreamItem {
    Unit(Packet),
    /// The container was repositioned; the next unit is frame `frame`.
    Flush { frame: u64 },
    /// No more units will follow.
    End,
}

/// Queue type shared by both live stages.
pub type LiveQueue = WorkQueue<StreamItem>;

/// An opened container plus the decoder for its first video stream.
pub struct LiveSource {
    container: Box<dyn Container>,
    decoder: Box<dyn Decoder>,
    stream: StreamInfo,
}

/// Knobs for the two live stages.
#[derive(Clone, Copy, Debug)]
pub struct LiveOptions {
    /// Sleep between pause re-checks in the decode stage.
    pub pause_poll: Duration,
    /// Units the extraction stage may queue ahead of the decoder.
    pub queue_depth: usize,
}

impl LiveSource {
    /// Open `uri`, pick its first video stream and publish its rate and size.
    pub fn open(backend: &dyn MediaBackend, uri: &Path, control: &PlaybackControl) -> Result<Self> {
        let container = backend.open(uri)?;
        let stream = first_video_stream(container.as_ref())
            .ok_or_else(|| anyhow!("no video stream in {:?}", uri))?;
        frame::validate_dimensions(stream.width, stream.height)?;
        let decoder = container
            .decoder(&stream)
            .with_context(|| format!("open decoder for stream {}", stream.index))?;

        if !control.set_dimensions(stream.width, stream.height) {
            return Err(anyhow!(
                "stream size {}x{} conflicts with active geometry",
                stream.width,
                stream.height
            ));
        }
        if let Some(rate) = stream.frame_rate {
            control.set_frame_rate(rate);
        }
        tracing::info!(
            uri = %uri.display(),
            stream = stream.index,
            width = stream.width,
            height = stream.height,
            fps = ?stream.frame_rate,
            "live source opened"
        );
        Ok(Self {
            container,
            decoder,
            stream,
        })
    }

    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    /// Start the extraction and decode threads.
    pub fn spawn(
        self,
        renderer: Renderer,
        control: Arc<PlaybackControl>,
        queue: Arc<LiveQueue>,
        options: LiveOptions,
    ) -> Result<Vec<JoinHandle<()>>> {
        let Self {
            container,
            decoder,
            stream,
        } = self;

        let extract = {
            let control = control.clone();
            let queue = queue.clone();
            thread::Builder::new()
                .name("live-extract".into())
                .spawn(move || extract_loop(container, stream, &control, &queue, options))
                .context("spawn extraction thread")?
        };

        let decode = {
            let queue = queue.clone();
            thread::Builder::new()
                .name("live-decode".into())
                .spawn(move || decode_loop(decoder, renderer, &control, &queue, options))
        };
        match decode {
            Ok(decode) => Ok(vec![extract, decode]),
            Err(e) => {
                queue.cancel();
                let _ = extract.join();
                Err(e).context("spawn decode thread")
            }
        }
    }
}

/// Producer side: read units, service seeks, republish position.
pub fn extract_loop(
    mut container: Box<dyn Container>,
    stream: StreamInfo,
    control: &PlaybackControl,
    queue: &LiveQueue,
    options: LiveOptions,
) {
    let mut units = 0u64;
    loop {
        if control.abort_requested() || queue.is_cancelled() {
            break;
        }

        if let Some(target) = control.take_seek() {
            match container.seek_to_frame(stream.index, target as u64) {
                Ok(true) => {
                    let dropped = queue.flush();
                    queue.put(StreamItem::Flush {
                        frame: target as u64,
                    });
                    if let Some(fps) = stream.frame_rate {
                        control.set_position_ms((target as f64 * 1000.0 / fps).round() as u64);
                    }
                    tracing::info!(frame = target, dropped, "live seek applied");
                }
                Ok(false) => tracing::warn!(frame = target, "container cannot seek; request ignored"),
                Err(e) => tracing::warn!("seek to frame {target} failed: {e:#}"),
            }
        }

        if !queue.wait_for_room(options.queue_depth, options.pause_poll) {
            continue;
        }

        match container.read_unit() {
            Ok(Some(packet)) => {
                if packet.stream_index != stream.index {
                    continue;
                }
                if let Some(ms) = packet.pts.and_then(|pts| stream.pts_to_ms(pts)) {
                    control.set_position_ms(ms);
                }
                units += 1;
                queue.put(StreamItem::Unit(packet));
            }
            Ok(None) => {
                tracing::debug!(units, "end of container");
                break;
            }
            Err(e) => {
                tracing::warn!(units, "container read failed: {e:#}");
                break;
            }
        }
    }
    queue.put(StreamItem::End);
}

/// Consumer side: decode, skip, present, pace.
pub fn decode_loop(
    mut decoder: Box<dyn Decoder>,
    mut renderer: Renderer,
    control: &PlaybackControl,
    queue: &LiveQueue,
    options: LiveOptions,
) {
    let mut skipper = FrameSkipper::new();
    let mut next_frame = 0i64;
    let mut rendered = 0u64;

    'units: loop {
        if control.abort_requested() {
            break;
        }
        if control.is_paused() {
            thread::sleep(options.pause_poll);
            continue;
        }

        let Some(item) = queue.get() else {
            break;
        };
        let (frames, last) = match item {
            StreamItem::Unit(packet) => match decoder.decode(packet) {
                Ok(frames) => (frames, false),
                Err(e) => {
                    tracing::warn!("decode failed, unit skipped: {e:#}");
                    continue;
                }
            },
            StreamItem::Flush { frame } => {
                decoder.reset();
                skipper.reset();
                next_frame = frame as i64;
                control.set_current_frame(next_frame);
                continue;
            }
            StreamItem::End => match decoder.drain() {
                Ok(frames) => (frames, true),
                Err(e) => {
                    tracing::warn!("decoder drain failed: {e:#}");
                    (Vec::new(), true)
                }
            },
        };

        for frame in frames {
            let index = next_frame;
            next_frame += 1;
            let speed = control.speed();
            if !skipper.should_render(speed) {
                continue;
            }
            if let Err(e) = renderer.present(&frame) {
                tracing::error!("render stopped: {e:#}");
                break 'units;
            }
            rendered += 1;
            control.set_current_frame(index);
            let delay = render::frame_delay(control.frame_rate(), speed);
            if !render::pace(control, delay, options.pause_poll) {
                break 'units;
            }
        }

        if last {
            tracing::info!(rendered, "live stream finished");
            break;
        }
    }

    queue.cancel();
    control.set_playing(false);
}
