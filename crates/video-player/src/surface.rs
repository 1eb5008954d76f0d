//! Presentation surface boundary.
//!
//! A [`Surface`] hands out a lockable pixel buffer. Callers never lock it
//! directly; they go through [`LockedSurface`], whose drop always unlocks
//! and presents, even when the write fails part-way.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};

use crate::convert::RGBA_BYTES;

/// Pixel layouts a surface can be configured for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
}

/// A locked surface buffer. `stride_bytes` may exceed `width * 4`.
pub struct SurfaceBuffer<'a> {
    pub bits: &'a mut [u8],
    pub stride_bytes: usize,
}

/// Target that decoded frames are drawn onto.
pub trait Surface: Send {
    /// Resize the surface's buffers to `width`×`height` in `format`.
    fn set_geometry(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<()>;

    /// Lock the back buffer for writing.
    fn lock(&mut self) -> Result<()>;

    /// Access the locked back buffer. Only valid between `lock` and `unlock_and_present`.
    fn buffer(&mut self) -> Result<SurfaceBuffer<'_>>;

    /// Release the back buffer and show it.
    fn unlock_and_present(&mut self);
}

/// Scoped surface lock.
pub struct LockedSurface<'s> {
    surface: &'s mut dyn Surface,
}

impl<'s> LockedSurface<'s> {
    /// Lock `surface`; the returned guard unlocks and presents when dropped.
    pub fn acquire(surface: &'s mut dyn Surface) -> Result<Self> {
        surface.lock()?;
        Ok(Self { surface })
    }

    pub fn buffer(&mut self) -> Result<SurfaceBuffer<'_>> {
        self.surface.buffer()
    }
}

impl Drop for LockedSurface<'_> {
    fn drop(&mut self) {
        self.surface.unlock_and_present();
    }
}

/// Last image presented by a [`MemorySurface`].
#[derive(Clone, Debug, Default)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub stride_bytes: usize,
    pub pixels: Vec<u8>,
    /// Number of `unlock_and_present` calls so far.
    pub presents: u64,
}

impl PresentedFrame {
    /// Write the image as a binary PPM (alpha dropped).
    pub fn write_ppm<W: Write>(&self, mut out: W) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("no frame has been presented"));
        }
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let row_bytes = self.width as usize * RGBA_BYTES;
        let mut rgb = Vec::with_capacity(self.width as usize * 3);
        for row in self.pixels.chunks(self.stride_bytes).take(self.height as usize) {
            rgb.clear();
            for px in row[..row_bytes].chunks_exact(RGBA_BYTES) {
                rgb.extend_from_slice(&px[..3]);
            }
            out.write_all(&rgb)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// In-memory surface with optional row padding.
///
/// Presenting copies the back buffer into a shared [`PresentedFrame`] that
/// callers can inspect through [`MemorySurface::handle`].
pub struct MemorySurface {
    row_padding: usize,
    width: u32,
    height: u32,
    stride_bytes: usize,
    back: Vec<u8>,
    locked: bool,
    front: Arc<Mutex<PresentedFrame>>,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::with_row_padding(0)
    }

    /// Surface whose rows carry `row_padding` extra bytes past the pixel data.
    pub fn with_row_padding(row_padding: usize) -> Self {
        Self {
            row_padding,
            width: 0,
            height: 0,
            stride_bytes: 0,
            back: Vec::new(),
            locked: false,
            front: Arc::new(Mutex::new(PresentedFrame::default())),
        }
    }

    /// Shared view of the most recently presented frame.
    pub fn handle(&self) -> Arc<Mutex<PresentedFrame>> {
        self.front.clone()
    }
}

impl Surface for MemorySurface {
    fn set_geometry(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(anyhow!("invalid surface geometry {width}x{height}"));
        }
        match format {
            PixelFormat::Rgba8888 => {}
        }
        self.width = width;
        self.height = height;
        self.stride_bytes = width as usize * RGBA_BYTES + self.row_padding;
        self.back = vec![0; self.stride_bytes * height as usize];
        tracing::debug!(width, height, stride = self.stride_bytes, "surface geometry set");
        Ok(())
    }

    fn lock(&mut self) -> Result<()> {
        if self.back.is_empty() {
            return Err(anyhow!("surface has no geometry"));
        }
        if self.locked {
            return Err(anyhow!("surface already locked"));
        }
        self.locked = true;
        Ok(())
    }

    fn buffer(&mut self) -> Result<SurfaceBuffer<'_>> {
        if !self.locked {
            return Err(anyhow!("surface is not locked"));
        }
        Ok(SurfaceBuffer {
            bits: &mut self.back,
            stride_bytes: self.stride_bytes,
        })
    }

    fn unlock_and_present(&mut self) {
        if !self.locked {
            return;
        }
        self.locked = false;
        let mut front = self.front.lock().unwrap_or_else(PoisonError::into_inner);
        front.width = self.width;
        front.height = self.height;
        front.stride_bytes = self.stride_bytes;
        front.pixels.clone_from(&self.back);
        front.presents += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_presents_on_drop() {
        let mut surface = MemorySurface::new();
        surface.set_geometry(2, 2, PixelFormat::Rgba8888).unwrap();
        let front = surface.handle();
        {
            let mut guard = LockedSurface::acquire(&mut surface).unwrap();
            let mut buf = guard.buffer().unwrap();
            buf.bits.fill(7);
        }
        let front = front.lock().unwrap();
        assert_eq!(front.presents, 1);
        assert!(front.pixels.iter().all(|&b| b == 7));
    }

    #[test]
    fn lock_without_geometry_fails() {
        let mut surface = MemorySurface::new();
        assert!(LockedSurface::acquire(&mut surface).is_err());
        assert_eq!(surface.handle().lock().unwrap().presents, 0);
    }

    #[test]
    fn buffer_requires_lock() {
        let mut surface = MemorySurface::new();
        surface.set_geometry(2, 2, PixelFormat::Rgba8888).unwrap();
        assert!(surface.buffer().is_err());
    }

    #[test]
    fn padded_rows_report_wider_stride() {
        let mut surface = MemorySurface::with_row_padding(12);
        surface.set_geometry(4, 2, PixelFormat::Rgba8888).unwrap();
        surface.lock().unwrap();
        let buf = surface.buffer().unwrap();
        assert_eq!(buf.stride_bytes, 28);
        assert_eq!(buf.bits.len(), 56);
    }

    #[test]
    fn ppm_drops_alpha_and_padding() {
        let frame = PresentedFrame {
            width: 1,
            height: 2,
            stride_bytes: 6,
            pixels: vec![1, 2, 3, 255, 9, 9, 4, 5, 6, 255, 9, 9],
            presents: 1,
        };
        let mut out = Vec::new();
        frame.write_ppm(&mut out).unwrap();
        let header = b"P6\n1 2\n255\n";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(&out[header.len()..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn ppm_without_frame_is_an_error() {
        let mut out = Vec::new();
        assert!(PresentedFrame::default().write_ppm(&mut out).is_err());
    }
}
