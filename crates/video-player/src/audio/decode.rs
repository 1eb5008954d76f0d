//! Audio file decode stage.
//!
//! Symphonia probes the file, seeks to the requested offset and a background
//! thread pushes interleaved `f32` samples into a [`PcmBuffer`] until EOF or
//! until its generation is superseded.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::pcm::PcmBuffer;

/// What probing an audio file found.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSpec {
    pub sample_rate: u32,
    pub channels: usize,
    pub duration_ms: Option<u64>,
    pub codec: Option<String>,
}

struct OpenedSource {
    format: Box<dyn FormatReader>,
    params: CodecParameters,
    spec: SourceSpec,
}

fn open_source(path: &Path) -> Result<OpenedSource> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("probe {:?}", path))?;

    let format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track in {:?}", path))?;
    let params = track.codec_params.clone();
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?
        .count();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;

    let spec = SourceSpec {
        sample_rate,
        channels,
        duration_ms: duration_ms(&params),
        codec: codec_name(&params),
    };
    Ok(OpenedSource {
        format,
        params,
        spec,
    })
}

/// Probe `path` without decoding.
pub fn probe(path: &Path) -> Result<SourceSpec> {
    Ok(open_source(path)?.spec)
}

/// Start decoding `path` from `start_ms` into `buffer` under `generation`.
///
/// The thread exits at EOF (closing the generation) or as soon as the buffer
/// moves to a newer generation.
pub fn spawn_decode(
    path: PathBuf,
    start_ms: u64,
    buffer: Arc<PcmBuffer>,
    generation: u64,
) -> Result<(SourceSpec, JoinHandle<()>)> {
    let OpenedSource {
        mut format,
        params,
        spec,
    } = open_source(&path)?;

    if start_ms > 0 {
        let time = Time::new(start_ms / 1000, (start_ms % 1000) as f64 / 1000.0);
        if let Err(e) = format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: None,
            },
        ) {
            tracing::warn!(start_ms, "audio seek failed, decoding from start: {e}");
        }
    }

    let handle = thread::Builder::new()
        .name("audio-decode".into())
        .spawn(move || {
            if let Err(e) = decode_loop(format, &params, &buffer, generation) {
                tracing::error!("audio decode thread error: {e:#}");
            }
            buffer.close(generation);
        })
        .context("spawn audio decode thread")?;

    tracing::debug!(
        path = %path.display(),
        start_ms,
        rate = spec.sample_rate,
        channels = spec.channels,
        codec = spec.codec.as_deref().unwrap_or("unknown"),
        "audio decode started"
    );
    Ok((spec, handle))
}

fn decode_loop(
    mut format: Box<dyn FormatReader>,
    params: &CodecParameters,
    buffer: &PcmBuffer,
    generation: u64,
) -> Result<()> {
    let mut decoder = symphonia::default::get_codecs().make(params, &DecoderOptions::default())?;
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break,
        };
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("audio packet skipped: {e}");
                continue;
            }
        };
        let mut samples = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        samples.copy_interleaved_ref(decoded);
        if !buffer.push_blocking(generation, samples.samples()) {
            break;
        }
    }
    Ok(())
}

fn duration_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let rate = u64::from(params.sample_rate?);
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

fn codec_name(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

/// Write a mono 16-bit PCM WAV file for tests.
#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, rate: u32, samples: &[i16]) {
    let data_len = (samples.len() * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&(rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::PcmBuffer;
    use std::time::{Duration, Instant};

    #[test]
    fn probe_reports_wav_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 8_000, &[0; 8_000]);

        let spec = probe(&path).unwrap();
        assert_eq!(spec.sample_rate, 8_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.duration_ms, Some(1_000));
        assert_eq!(spec.codec.as_deref(), Some("PCM_S16"));
    }

    #[test]
    fn decode_fills_buffer_until_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let samples: Vec<i16> = (0..1_000).map(|i| (i * 16) as i16).collect();
        write_test_wav(&path, 8_000, &samples);

        let buffer = Arc::new(PcmBuffer::new(1, 64));
        let generation = buffer.restart();
        let (_spec, handle) = spawn_decode(path, 0, buffer.clone(), generation).unwrap();

        let mut out = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !buffer.is_drained() && Instant::now() < deadline {
            match buffer.pop_up_to(100) {
                Some(v) => out.extend(v),
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        handle.join().unwrap();
        assert_eq!(out.len(), 1_000);
        assert!((out[10] - 160.0 / 32_768.0).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = probe(&dir.path().join("nope.wav")).unwrap_err();
        assert!(format!("{err:#}").contains("open"));
    }

    #[test]
    fn duration_needs_a_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms(&params).is_none());
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ms(&params), Some(2_000));
    }
}
