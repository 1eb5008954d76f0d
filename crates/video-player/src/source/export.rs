//! Decode a container into a headerless flat frame file.
//!
//! The output is exactly what [`super::precomputed`] plays back: frame `n` at
//! byte offset `n * width * height * 3 / 2`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use super::{MediaBackend, first_video_stream};
use crate::frame::RawFrame;

/// What an export produced.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
}

/// Decode every video unit of `input` and write the frames to `output`.
pub fn export_raw(backend: &dyn MediaBackend, input: &Path, output: &Path) -> Result<ExportSummary> {
    let mut container = backend.open(input)?;
    let stream = first_video_stream(container.as_ref())
        .ok_or_else(|| anyhow!("no video stream in {:?}", input))?;
    let mut decoder = container
        .decoder(&stream)
        .with_context(|| format!("open decoder for stream {}", stream.index))?;

    let file = File::create(output).with_context(|| format!("create {:?}", output))?;
    let mut out = BufWriter::new(file);
    let mut frames = 0u64;

    while let Some(packet) = container
        .read_unit()
        .with_context(|| format!("read {:?}", input))?
    {
        if packet.stream_index != stream.index {
            continue;
        }
        let decoded = match decoder.decode(packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(frame = frames, "decode failed, unit skipped: {e:#}");
                continue;
            }
        };
        for frame in decoded {
            write_planes(&mut out, &frame)?;
            frames += 1;
        }
    }
    for frame in decoder.drain()? {
        write_planes(&mut out, &frame)?;
        frames += 1;
    }
    out.flush().with_context(|| format!("flush {:?}", output))?;

    tracing::info!(
        frames,
        width = stream.width,
        height = stream.height,
        output = %output.display(),
        "export finished"
    );
    Ok(ExportSummary {
        frames,
        width: stream.width,
        height: stream.height,
        frame_rate: stream.frame_rate,
    })
}

/// Write Y rows, then U rows, then V rows.
fn write_planes<W: Write>(out: &mut W, frame: &RawFrame) -> Result<()> {
    let width = frame.width() as usize;
    let chroma_width = width / 2;
    let (y, u, v) = frame.planes();
    for row in y.chunks_exact(width) {
        out.write_all(row)?;
    }
    for plane in [u, v] {
        for row in plane.chunks_exact(chroma_width) {
            out.write_all(row)?;
        }
    }
    Ok(())
}
