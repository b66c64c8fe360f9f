use image::RgbaImage;

use super::frame::{PixelFormat, VideoFrame};
use crate::error::{Error, Result};

/// Convert a BGRA frame into an RGBA bitmap.
///
/// Rows are copied one at a time so a producer stride wider than
/// `width * 4` is honoured.
pub fn decode_frame(frame: &VideoFrame) -> Result<RgbaImage> {
    let Some(bytes_per_pixel) = frame.meta.format.bytes_per_pixel() else {
        return Err(Error::ReadFailure(format!(
            "unsupported pixel format {:?}",
            frame.meta.format
        )));
    };
    let bytes_per_pixel = bytes_per_pixel as usize;

    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride() as usize;
    let row_len = width * bytes_per_pixel;
    if stride < row_len || frame.data.len() < stride * height.saturating_sub(1) + row_len {
        return Err(Error::ReadFailure(format!(
            "frame data too short for {}x{} (stride {}, {} bytes)",
            width,
            height,
            stride,
            frame.data.len()
        )));
    }

    let mut rgba = Vec::with_capacity(row_len * height);
    for y in 0..height {
        let row = &frame.data[y * stride..y * stride + row_len];
        for px in row.chunks_exact(bytes_per_pixel) {
            rgba.push(px[2]); // R
            rgba.push(px[1]); // G
            rgba.push(px[0]); // B
            rgba.push(px[3]); // A
        }
    }

    RgbaImage::from_raw(frame.width(), frame.height(), rgba)
        .ok_or_else(|| Error::ReadFailure("bitmap buffer size mismatch".into()))
}
