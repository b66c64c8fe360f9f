//! Frame-exchange protocol: header codec and consumer-side synchronization

pub mod header;
pub mod sync;

use serde::{Deserialize, Serialize};

pub use header::{Header, HeaderV1, HeaderV2, SlotState, MAGIC, RING_SLOTS};
pub use sync::{ExtractMode, Extraction, FrameSource, FrameSynchronizer, SessionReset};

/// Protocol revision negotiated once at connect time from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Single slot guarded by one ready flag.
    V1,
    /// Three-slot ring with per-slot ready flags.
    V2RingBuffer,
}

impl Protocol {
    pub fn version(self) -> u32 {
        match self {
            Protocol::V1 => 1,
            Protocol::V2RingBuffer => 2,
        }
    }
}
