//! Integer BT.601 conversion from planar 4:2:0 to packed RGBA.
//!
//! Chroma is upsampled nearest-neighbour: pixel `(x, y)` reads U/V sample
//! `(y / 2) * (width / 2) + x / 2`.

use anyhow::{Result, anyhow};

use crate::frame::RawFrame;

/// Bytes per output pixel.
pub const RGBA_BYTES: usize = 4;

#[inline]
fn clamp8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert one Y/U/V sample triple to `[r, g, b, a]`.
#[inline]
pub fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp8((298 * c + 409 * e + 128) >> 8),
        clamp8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp8((298 * c + 516 * d + 128) >> 8),
        255,
    ]
}

/// Convert pixel row `row` of `frame` into `dst`, which must hold `width * 4` bytes.
pub fn convert_row(frame: &RawFrame, row: usize, dst: &mut [u8]) {
    let width = frame.width() as usize;
    let (y_plane, u_plane, v_plane) = frame.planes();
    let luma = &y_plane[row * width..(row + 1) * width];
    let chroma_row = (row / 2) * (width / 2);
    for (x, (px, &y)) in dst.chunks_exact_mut(RGBA_BYTES).zip(luma).enumerate() {
        let ci = chroma_row + x / 2;
        px.copy_from_slice(&yuv_to_rgba(y, u_plane[ci], v_plane[ci]));
    }
}

/// Convert a whole frame into a packed RGBA buffer with `stride_bytes` per row.
///
/// Bytes past `width * 4` in each row are left untouched.
pub fn convert_frame(frame: &RawFrame, dst: &mut [u8], stride_bytes: usize) -> Result<()> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * RGBA_BYTES;
    if stride_bytes < row_bytes {
        return Err(anyhow!(
            "surface stride {stride_bytes} is smaller than row width {row_bytes}"
        ));
    }
    let needed = stride_bytes * height.saturating_sub(1) + row_bytes;
    if height > 0 && dst.len() < needed {
        return Err(anyhow!(
            "surface buffer is {} bytes, need {needed} for {width}x{height}",
            dst.len()
        ));
    }
    for row in 0..height {
        let start = row * stride_bytes;
        convert_row(frame, row, &mut dst[start..start + row_bytes]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_input_saturates_into_range() {
        for y in 0..=255i32 {
            for u in 0..=255i32 {
                for v in 0..=255i32 {
                    let px = yuv_to_rgba(y as u8, u as u8, v as u8);
                    let (c, d, e) = (y - 16, u - 128, v - 128);
                    let r = (298 * c + 409 * e + 128) >> 8;
                    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
                    let b = (298 * c + 516 * d + 128) >> 8;
                    assert_eq!(px, [
                        r.clamp(0, 255) as u8,
                        g.clamp(0, 255) as u8,
                        b.clamp(0, 255) as u8,
                        255
                    ]);
                }
            }
        }
    }

    #[test]
    fn known_colours() {
        assert_eq!(yuv_to_rgba(16, 128, 128), [0, 0, 0, 255]);
        assert_eq!(yuv_to_rgba(235, 128, 128), [255, 255, 255, 255]);
        assert_eq!(yuv_to_rgba(0, 0, 0), [0, 135, 0, 255]);
        assert_eq!(yuv_to_rgba(255, 255, 255), [255, 125, 255, 255]);
    }

    #[test]
    fn chroma_is_shared_by_two_by_two_blocks() {
        // 4x2 frame: left block grey, right block red-ish.
        let mut data = vec![128u8; 12];
        data[8] = 128; // u, block 0
        data[9] = 128; // u, block 1
        data[10] = 128; // v, block 0
        data[11] = 240; // v, block 1
        let frame = RawFrame::new(4, 2, data).unwrap();
        let mut out = vec![0u8; 4 * 2 * RGBA_BYTES];
        convert_frame(&frame, &mut out, 16).unwrap();

        let grey = yuv_to_rgba(128, 128, 128);
        let red = yuv_to_rgba(128, 128, 240);
        for row in 0..2 {
            let base = row * 16;
            assert_eq!(&out[base..base + 4], &grey);
            assert_eq!(&out[base + 4..base + 8], &grey);
            assert_eq!(&out[base + 8..base + 12], &red);
            assert_eq!(&out[base + 12..base + 16], &red);
        }
    }

    #[test]
    fn padded_stride_leaves_tail_bytes_alone() {
        let frame = RawFrame::black(2, 2);
        let stride = 2 * RGBA_BYTES + 5;
        let mut out = vec![0xAAu8; stride * 2];
        convert_frame(&frame, &mut out, stride).unwrap();
        for row in 0..2 {
            let base = row * stride;
            assert_eq!(&out[base..base + 4], &[0, 0, 0, 255]);
            assert!(out[base + 8..base + stride].iter().all(|&b| b == 0xAA));
        }
    }

    #[test]
    fn short_stride_or_buffer_is_rejected() {
        let frame = RawFrame::black(4, 4);
        let mut out = vec![0u8; 64];
        assert!(convert_frame(&frame, &mut out, 8).is_err());
        let mut small = vec![0u8; 40];
        assert!(convert_frame(&frame, &mut small, 16).is_err());
    }

    #[test]
    fn conversion_is_deterministic() {
        let mut frame = RawFrame::black(4, 4);
        for (i, b) in frame.data_mut().iter_mut().enumerate() {
            *b = (i * 37 % 256) as u8;
        }
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        convert_frame(&frame, &mut a, 16).unwrap();
        convert_frame(&frame, &mut b, 16).unwrap();
        assert_eq!(a, b);
    }
}
