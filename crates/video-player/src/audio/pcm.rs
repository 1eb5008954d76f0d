//! Bounded interleaved PCM buffer between the decode thread and the output callback.
//!
//! Producers are tagged with a generation. [`PcmBuffer::restart`] bumps it, which
//! empties the buffer and makes every older producer's next push fail, so a seek
//! can replace the decode thread without stale audio leaking through.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub struct PcmBuffer {
    channels: usize,
    capacity: usize,
    inner: Mutex<PcmInner>,
    cv: Condvar,
}

struct PcmInner {
    samples: VecDeque<f32>,
    generation: u64,
    closed: bool,
}

/// Capacity in samples for `seconds` of audio at `rate_hz`.
///
/// Non-finite or non-positive durations fall back to one second.
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        1.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.max(1).saturating_mul(channels.max(1))
}

impl PcmBuffer {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity: capacity_samples.max(channels),
            inner: Mutex::new(PcmInner {
                samples: VecDeque::new(),
                generation: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PcmInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    /// Whether the current producer finished and everything buffered was consumed.
    pub fn is_drained(&self) -> bool {
        let g = self.lock();
        g.closed && g.samples.is_empty()
    }

    /// Push samples, blocking while the buffer is full.
    ///
    /// Returns `false` once `generation` is no longer current; the caller should stop producing.
    pub fn push_blocking(&self, generation: u64, samples: &[f32]) -> bool {
        let mut offset = 0;
        let mut g = self.lock();
        while offset < samples.len() {
            while g.generation == generation && g.samples.len() >= self.capacity {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.generation != generation {
                return false;
            }
            let room = self.capacity - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
        }
        true
    }

    /// Pop up to `max_frames` whole frames without blocking.
    pub fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let frames = (g.samples.len() / self.channels).min(max_frames);
        if frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..frames * self.channels).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Drop everything buffered; the current producer keeps going.
    pub fn clear(&self) -> usize {
        let mut g = self.lock();
        let dropped = g.samples.len() / self.channels;
        g.samples.clear();
        drop(g);
        self.cv.notify_all();
        dropped
    }

    /// Empty the buffer and start a new producer generation.
    pub fn restart(&self) -> u64 {
        let mut g = self.lock();
        g.samples.clear();
        g.generation += 1;
        g.closed = false;
        let generation = g.generation;
        drop(g);
        self.cv.notify_all();
        generation
    }

    /// Mark `generation` as finished. Ignored for stale generations.
    pub fn close(&self, generation: u64) {
        let mut g = self.lock();
        if g.generation == generation {
            g.closed = true;
        }
    }

    /// Invalidate every producer, e.g. when the output is torn down.
    pub fn shutdown(&self) {
        let mut g = self.lock();
        g.generation += 1;
        g.closed = true;
        g.samples.clear();
        drop(g);
        self.cv.notify_all();
    }
}
