//! CPAL output stream fed from a [`PcmBuffer`].
//!
//! The callback never blocks: it refills a small local buffer with a
//! non-blocking pop, maps channels and writes silence on underrun or pause.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::pcm::PcmBuffer;

/// Shared knobs read by the real-time callback.
#[derive(Clone)]
pub struct OutputControl {
    /// When set, the callback outputs silence and leaves the buffer untouched.
    pub paused: Arc<AtomicBool>,
    /// Frames pulled from the buffer per refill.
    pub refill_max_frames: usize,
}

/// Build an output stream in `sample_format` that plays `buffer`.
///
/// `on_error` receives stream errors from the backend thread.
pub fn build_output_stream<E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    buffer: Arc<PcmBuffer>,
    control: OutputControl,
    on_error: E,
) -> Result<cpal::Stream>
where
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, E>(device, config, buffer, control, on_error),
        cpal::SampleFormat::I16 => build_stream::<i16, E>(device, config, buffer, control, on_error),
        cpal::SampleFormat::I32 => build_stream::<i32, E>(device, config, buffer, control, on_error),
        cpal::SampleFormat::U16 => build_stream::<u16, E>(device, config, buffer, control, on_error),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }
}

fn build_stream<T, E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: Arc<PcmBuffer>,
    control: OutputControl,
    on_error: E,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
    E: FnMut(cpal::StreamError) + Send + 'static,
{
    let channels_out = usize::from(config.channels).max(1);
    let refill = control.refill_max_frames.max(1);
    let mut local = LocalFrames::new(buffer.channels());

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if control.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            for frame in data.chunks_mut(channels_out) {
                if local.is_empty() {
                    match buffer.pop_up_to(refill) {
                        Some(samples) => local.refill(samples),
                        None => {
                            frame.fill(silence);
                            continue;
                        }
                    }
                }
                for (ch, out) in frame.iter_mut().enumerate() {
                    *out = <T as cpal::Sample>::from_sample::<f32>(local.mapped(channels_out, ch));
                }
                local.advance();
            }
        },
        on_error,
        None,
    )?;
    Ok(stream)
}

/// Interleaved samples pulled from the shared buffer, consumed frame by frame.
struct LocalFrames {
    src_channels: usize,
    pos: usize,
    src: Vec<f32>,
}

impl LocalFrames {
    fn new(src_channels: usize) -> Self {
        Self {
            src_channels: src_channels.max(1),
            pos: 0,
            src: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn refill(&mut self, samples: Vec<f32>) {
        self.src = samples;
        self.pos = 0;
    }

    fn advance(&mut self) {
        self.pos += self.src_channels;
    }

    /// Sample for output channel `dst_ch` of the current frame.
    ///
    /// Mono is duplicated, stereo is averaged down to mono, other layouts map
    /// channel-for-channel and reuse the last source channel.
    fn mapped(&self, dst_channels: usize, dst_ch: usize) -> f32 {
        let get = |ch: usize| self.src.get(self.pos + ch).copied().unwrap_or(0.0);
        match (self.src_channels, dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            (src, _) => get(dst_ch.min(src - 1)),
        }
    }
}
