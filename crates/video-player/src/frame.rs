//! Raw planar 4:2:0 frames.

use anyhow::{Result, anyhow};

/// Bytes in one planar 4:2:0 frame: a full-resolution Y plane plus quarter-size U and V.
pub const fn frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3 / 2
}

/// Check that `width`×`height` can carry 4:2:0 chroma without a ragged edge.
pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero, got {width}x{height}"));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(anyhow!("4:2:0 frames need even dimensions, got {width}x{height}"));
    }
    Ok(())
}

/// One decoded picture, Y plane followed by U and V planes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RawFrame {
    /// Wrap `data` as a frame, checking the dimensions and that it holds exactly
    /// one frame's worth of bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        validate_dimensions(width, height)?;
        let want = frame_size(width, height);
        if data.len() != want {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {want} for {width}x{height}",
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A black frame (Y=16, U=V=128).
    pub fn black(width: u32, height: u32) -> Self {
        let luma = width as usize * height as usize;
        let mut data = vec![128u8; frame_size(width, height)];
        data[..luma].fill(16);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Split into `(y, u, v)` plane slices.
    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        let luma = self.width as usize * self.height as usize;
        let chroma = luma / 4;
        let (y, rest) = self.data.split_at(luma);
        let (u, v) = rest.split_at(chroma);
        (y, u, &v[..chroma])
    }
}
