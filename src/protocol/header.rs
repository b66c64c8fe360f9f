//! Fixed-layout header codec
//!
//! The header is a packed little-endian record at offset 0 of the shared
//! region. Both revisions share the same eight-byte preamble (magic and
//! version), so the version can be read before the rest of the layout is
//! known.

use bytes::{Buf, BufMut, BytesMut};

use super::Protocol;
use crate::capture::frame::PixelFormat;
use crate::error::Mismatch;

/// "CHAK" in little endian.
pub const MAGIC: u32 = 0x4B41_4843;
pub const PREAMBLE_LEN: usize = 8;
pub const V1_HEADER_LEN: usize = 48;
pub const V2_HEADER_LEN: usize = 120;
pub const RING_SLOTS: usize = 3;

/// Protocol v1: one payload slot right after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderV1 {
    pub magic: u32,
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub frame_number: u64,
    pub data_size: u32,
    pub ready: u32,
}

/// Readiness and identity of one ring slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotState {
    pub ready: u32,
    pub timestamp_ms: u64,
    pub frame_number: u64,
}

/// Protocol v2: a ring of [`RING_SLOTS`] independently tracked slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderV2 {
    pub magic: u32,
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub frame_data_size: u32,
    pub ring_buffer_size: u32,
    pub ring_buffer_frame_offset: u32,
    pub write_index: u32,
    /// Advisory only; the consumer never writes it back.
    pub read_index: u32,
    pub total_frames: u64,
    pub timestamp_ms: u64,
    pub slots: [SlotState; RING_SLOTS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    V1(HeaderV1),
    V2(HeaderV2),
}

/// Decode and validate the header at the start of `bytes`.
///
/// Magic is checked before anything else, so a foreign region is reported as
/// [`Mismatch::BadMagic`] regardless of what follows it.
pub fn decode(bytes: &[u8]) -> Result<Header, Mismatch> {
    require(PREAMBLE_LEN, bytes.len())?;
    let mut preamble = &bytes[..PREAMBLE_LEN];
    let magic = preamble.get_u32_le();
    if magic != MAGIC {
        return Err(Mismatch::BadMagic {
            found: magic,
            expected: MAGIC,
        });
    }
    match preamble.get_u32_le() {
        1 => {
            require(V1_HEADER_LEN, bytes.len())?;
            Ok(Header::V1(HeaderV1::read(&bytes[..V1_HEADER_LEN])))
        }
        2 => {
            require(V2_HEADER_LEN, bytes.len())?;
            let header = HeaderV2::read(&bytes[..V2_HEADER_LEN]);
            if header.ring_buffer_size as usize != RING_SLOTS {
                return Err(Mismatch::Layout(format!(
                    "ring buffer size {} (expected {RING_SLOTS})",
                    header.ring_buffer_size
                )));
            }
            Ok(Header::V2(header))
        }
        other => Err(Mismatch::UnsupportedVersion(other)),
    }
}

fn require(needed: usize, available: usize) -> Result<(), Mismatch> {
    if available < needed {
        return Err(Mismatch::Truncated { needed, available });
    }
    Ok(())
}

impl HeaderV1 {
    fn read(mut buf: &[u8]) -> Self {
        Self {
            magic: buf.get_u32_le(),
            version: buf.get_u32_le(),
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
            stride: buf.get_u32_le(),
            format: buf.get_u32_le(),
            timestamp_ms: buf.get_u64_le(),
            frame_number: buf.get_u64_le(),
            data_size: buf.get_u32_le(),
            ready: buf.get_u32_le(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(V1_HEADER_LEN);
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.stride);
        buf.put_u32_le(self.format);
        buf.put_u64_le(self.timestamp_ms);
        buf.put_u64_le(self.frame_number);
        buf.put_u32_le(self.data_size);
        buf.put_u32_le(self.ready);
        buf
    }
}

impl HeaderV2 {
    fn read(mut buf: &[u8]) -> Self {
        let magic = buf.get_u32_le();
        let version = buf.get_u32_le();
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let stride = buf.get_u32_le();
        let format = buf.get_u32_le();
        let frame_data_size = buf.get_u32_le();
        let ring_buffer_size = buf.get_u32_le();
        let ring_buffer_frame_offset = buf.get_u32_le();
        let write_index = buf.get_u32_le();
        let read_index = buf.get_u32_le();
        let total_frames = buf.get_u64_le();
        let timestamp_ms = buf.get_u64_le();

        // The producer lays slot fields out as three parallel arrays.
        let mut slots = [SlotState::default(); RING_SLOTS];
        for slot in &mut slots {
            slot.ready = buf.get_u32_le();
        }
        for slot in &mut slots {
            slot.timestamp_ms = buf.get_u64_le();
        }
        for slot in &mut slots {
            slot.frame_number = buf.get_u64_le();
        }

        Self {
            magic,
            version,
            width,
            height,
            stride,
            format,
            frame_data_size,
            ring_buffer_size,
            ring_buffer_frame_offset,
            write_index,
            read_index,
            total_frames,
            timestamp_ms,
            slots,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(V2_HEADER_LEN);
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.stride);
        buf.put_u32_le(self.format);
        buf.put_u32_le(self.frame_data_size);
        buf.put_u32_le(self.ring_buffer_size);
        buf.put_u32_le(self.ring_buffer_frame_offset);
        buf.put_u32_le(self.write_index);
        buf.put_u32_le(self.read_index);
        buf.put_u64_le(self.total_frames);
        buf.put_u64_le(self.timestamp_ms);
        for slot in &self.slots {
            buf.put_u32_le(slot.ready);
        }
        for slot in &self.slots {
            buf.put_u64_le(slot.timestamp_ms);
        }
        for slot in &self.slots {
            buf.put_u64_le(slot.frame_number);
        }
        buf
    }

    /// Byte offset of payload slot `index` within the region.
    pub fn slot_offset(&self, index: usize) -> usize {
        self.ring_buffer_frame_offset as usize + index * self.frame_data_size as usize
    }
}

impl Header {
    pub fn protocol(&self) -> Protocol {
        match self {
            Header::V1(_) => Protocol::V1,
            Header::V2(_) => Protocol::V2RingBuffer,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Header::V1(h) => h.version,
            Header::V2(h) => h.version,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Header::V1(h) => h.width,
            Header::V2(h) => h.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Header::V1(h) => h.height,
            Header::V2(h) => h.height,
        }
    }

    pub fn stride(&self) -> u32 {
        match self {
            Header::V1(h) => h.stride,
            Header::V2(h) => h.stride,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        let tag = match self {
            Header::V1(h) => h.format,
            Header::V2(h) => h.format,
        };
        PixelFormat::from_tag(tag)
    }

    /// Size in bytes of the header record itself.
    pub fn encoded_len(&self) -> usize {
        match self {
            Header::V1(_) => V1_HEADER_LEN,
            Header::V2(_) => V2_HEADER_LEN,
        }
    }

    /// Check that every payload area the header declares lies inside a
    /// region of `region_len` bytes.
    pub fn validate_layout(&self, region_len: usize) -> Result<(), Mismatch> {
        let end = match self {
            Header::V1(h) => (V1_HEADER_LEN as u64).checked_add(h.data_size as u64),
            Header::V2(h) => {
                if (h.ring_buffer_frame_offset as usize) < V2_HEADER_LEN {
                    return Err(Mismatch::Layout(format!(
                        "slot area offset {} overlaps the header",
                        h.ring_buffer_frame_offset
                    )));
                }
                (h.frame_data_size as u64)
                    .checked_mul(RING_SLOTS as u64)
                    .and_then(|area| area.checked_add(h.ring_buffer_frame_offset as u64))
            }
        };
        match end {
            Some(end) if end <= region_len as u64 => Ok(()),
            Some(end) => Err(Mismatch::Layout(format!(
                "declared payload ends at byte {end}, region is {region_len} bytes"
            ))),
            None => Err(Mismatch::Layout("declared payload size overflows".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1(frame_number: u64, ready: u32) -> HeaderV1 {
        HeaderV1 {
            magic: MAGIC,
            version: 1,
            width: 4,
            height: 2,
            stride: 16,
            format: 0,
            timestamp_ms: 1_700_000_000_000,
            frame_number,
            data_size: 32,
            ready,
        }
    }

    fn v2_1080p() -> HeaderV2 {
        HeaderV2 {
            magic: MAGIC,
            version: 2,
            width: 1920,
            height: 1080,
            stride: 1920 * 4,
            format: 0,
            frame_data_size: 1920 * 1080 * 4,
            ring_buffer_size: 3,
            ring_buffer_frame_offset: V2_HEADER_LEN as u32,
            write_index: 2,
            read_index: 1,
            total_frames: 0x0102_0304_0506_0708,
            timestamp_ms: 1_700_000_000_123,
            slots: [
                SlotState {
                    ready: 1,
                    timestamp_ms: 11,
                    frame_number: 7,
                },
                SlotState {
                    ready: 0,
                    timestamp_ms: 22,
                    frame_number: 8,
                },
                SlotState {
                    ready: 1,
                    timestamp_ms: 33,
                    frame_number: 9,
                },
            ],
        }
    }

    #[test]
    fn encoded_sizes_match_packed_layout() {
        assert_eq!(v1(1, 1).encode().len(), V1_HEADER_LEN);
        assert_eq!(v2_1080p().encode().len(), V2_HEADER_LEN);
    }

    #[test]
    fn v2_round_trip_preserves_every_field() {
        let header = v2_1080p();
        let decoded = decode(&header.encode()).expect("decode v2");
        let Header::V2(decoded) = decoded else {
            panic!("expected v2 header");
        };
        assert_eq!(decoded, header);
        assert_eq!(decoded.width, 1920);
        assert_eq!(decoded.height, 1080);
        assert_eq!(decoded.ring_buffer_size, 3);
        for (got, want) in decoded.slots.iter().zip(header.slots.iter()) {
            assert_eq!(got.ready, want.ready);
            assert_eq!(got.timestamp_ms, want.timestamp_ms);
            assert_eq!(got.frame_number, want.frame_number);
        }
    }

    #[test]
    fn v1_fields_sit_at_fixed_offsets() {
        let bytes = v1(0x1122_3344_5566_7788, 1).encode();
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&bytes[32..40], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[44..48], &1u32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), Header::V1(v1(0x1122_3344_5566_7788, 1)));
    }

    #[test]
    fn v2_slot_arrays_are_parallel() {
        let bytes = v2_1080p().encode();
        assert_eq!(&bytes[60..64], &1u32.to_le_bytes());
        assert_eq!(&bytes[72..80], &11u64.to_le_bytes());
        assert_eq!(&bytes[96..104], &7u64.to_le_bytes());
        assert_eq!(&bytes[112..120], &9u64.to_le_bytes());
    }

    #[test]
    fn wrong_magic_is_rejected_regardless_of_other_fields() {
        let mut header = v1(5, 1);
        header.magic = 0xDEAD_BEEF;
        let err = decode(&header.encode()).unwrap_err();
        assert_eq!(
            err,
            Mismatch::BadMagic {
                found: 0xDEAD_BEEF,
                expected: MAGIC
            }
        );

        let mut header = v2_1080p();
        header.magic = 0;
        header.version = 99;
        assert!(matches!(
            decode(&header.encode()),
            Err(Mismatch::BadMagic { found: 0, .. })
        ));
    }

    #[test]
    fn unknown_versions_are_rejected() {
        for version in [0, 3, 42, u32::MAX] {
            let mut header = v1(1, 1);
            header.version = version;
            assert_eq!(
                decode(&header.encode()),
                Err(Mismatch::UnsupportedVersion(version))
            );
        }
    }

    #[test]
    fn short_buffers_are_truncated() {
        assert_eq!(
            decode(&MAGIC.to_le_bytes()),
            Err(Mismatch::Truncated {
                needed: PREAMBLE_LEN,
                available: 4
            })
        );
        let bytes = v2_1080p().encode();
        assert!(matches!(
            decode(&bytes[..100]),
            Err(Mismatch::Truncated { needed: V2_HEADER_LEN, .. })
        ));
    }

    #[test]
    fn ring_size_other_than_three_is_a_layout_error() {
        let mut header = v2_1080p();
        header.ring_buffer_size = 4;
        assert!(matches!(decode(&header.encode()), Err(Mismatch::Layout(_))));
    }

    #[test]
    fn declared_payload_must_fit_region() {
        let header = Header::V1(v1(1, 1));
        assert!(header.validate_layout(V1_HEADER_LEN + 32).is_ok());
        assert!(header.validate_layout(V1_HEADER_LEN + 31).is_err());

        let mut h2 = v2_1080p();
        h2.frame_data_size = 16;
        let header = Header::V2(h2);
        assert!(header.validate_layout(V2_HEADER_LEN + 48).is_ok());
        assert!(header.validate_layout(V2_HEADER_LEN + 47).is_err());

        h2.ring_buffer_frame_offset = 8;
        assert!(Header::V2(h2).validate_layout(4096).is_err());
    }
}
