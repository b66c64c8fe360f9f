use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A frame copied out of the shared region.
///
/// The pixel bytes are an owned copy; the producer may overwrite the slot
/// they came from at any time without affecting this value.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Immutable pixel data - can be shared across threads without copying
    pub data: Bytes,

    pub meta: FrameMetadata,

    /// Local time at which the frame was copied out
    pub received_at: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Producer-assigned sequence number
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
    /// Producer timestamp, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Ring slot the frame was read from (protocol v2 only)
    pub slot: Option<u32>,
}

/// Pixel formats declared by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit BGRA, tag 0
    Bgra32,
    Other(u32),
}

impl PixelFormat {
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => PixelFormat::Bgra32,
            other => PixelFormat::Other(other),
        }
    }

    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Bgra32 => Some(4),
            PixelFormat::Other(_) => None,
        }
    }
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, meta: FrameMetadata) -> Self {
        Self {
            data: Bytes::from(data),
            meta,
            received_at: Instant::now(),
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.meta.frame_number
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn stride(&self) -> u32 {
        self.meta.stride
    }

    pub fn slot(&self) -> Option<u32> {
        self.meta.slot
    }
}
