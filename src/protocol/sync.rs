//! Consumer-side frame selection
//!
//! Ready flags and sequence numbers in the header are polled state owned by
//! the producer, not a lock. Every extraction decodes a fresh copy of the
//! header, picks the slot(s) holding frames newer than `last_consumed`,
//! copies them out, and re-reads the slot's sequence number afterwards. A
//! copy whose slot was rewritten in the meantime is discarded as torn.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::header::{self, Header, V1_HEADER_LEN, V2_HEADER_LEN};
use super::Protocol;
use crate::capture::frame::{FrameMetadata, VideoFrame};
use crate::error::{Error, Mismatch, Result};

/// Byte-addressable view of a shared region.
pub trait FrameSource {
    fn len(&self) -> usize;

    /// Copy `len` bytes starting at `offset` into an owned buffer.
    fn copy_out(&self, offset: usize, len: usize) -> Result<Vec<u8>>;

    fn read_header(&self) -> Result<Header> {
        let bytes = self.copy_out(0, self.len().min(V2_HEADER_LEN))?;
        Ok(header::decode(&bytes)?)
    }
}

impl FrameSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_out(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        offset
            .checked_add(len)
            .and_then(|end| self.get(offset..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::ReadFailure(format!("copy at {offset}+{len} out of bounds")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// Only the freshest ready frame; intermediate frames are skipped.
    #[default]
    Latest,
    /// Every ready frame newer than the last one consumed, oldest first.
    AllNew,
}

/// The producer's counters went backwards: it restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReset {
    /// Last sequence number consumed before the reset.
    pub last_consumed: u64,
    /// The regressed counter value that revealed the restart.
    pub observed: u64,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub frames: Vec<VideoFrame>,
    /// Frames the producer overwrote before they could be read.
    pub dropped: u64,
    /// Copies discarded because their slot changed mid-copy.
    pub torn: u64,
    pub reset: Option<SessionReset>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    slot: Option<u32>,
    frame_number: u64,
    timestamp_ms: u64,
    offset: usize,
    len: usize,
}

/// Ready payloads declared by `header`, in slot order.
fn ready_candidates(header: &Header) -> Vec<Candidate> {
    match header {
        Header::V1(h) if h.ready != 0 => vec![Candidate {
            slot: None,
            frame_number: h.frame_number,
            timestamp_ms: h.timestamp_ms,
            offset: V1_HEADER_LEN,
            len: h.data_size as usize,
        }],
        Header::V1(_) => Vec::new(),
        Header::V2(h) => h
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.ready != 0)
            .map(|(index, slot)| Candidate {
                slot: Some(index as u32),
                frame_number: slot.frame_number,
                timestamp_ms: slot.timestamp_ms,
                offset: h.slot_offset(index),
                len: h.frame_data_size as usize,
            })
            .collect(),
    }
}

/// Frames skipped between two deliveries. The first frame of a session
/// never counts as a drop.
fn gap(previous: u64, frame_number: u64) -> u64 {
    if previous == 0 {
        return 0;
    }
    frame_number.saturating_sub(previous.saturating_add(1))
}

pub struct FrameSynchronizer {
    protocol: Protocol,
    last_consumed: u64,
    /// Highest v2 `total_frames` seen this session.
    last_total: u64,
}

impl FrameSynchronizer {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            last_consumed: 0,
            last_total: 0,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn last_consumed(&self) -> u64 {
        self.last_consumed
    }

    /// Forget everything consumed so far and start a fresh session.
    pub fn reset(&mut self) {
        self.last_consumed = 0;
        self.last_total = 0;
    }

    /// Whether an extraction right now would find something to deliver.
    pub fn has_new_frame(&self, header: &Header) -> bool {
        if header.protocol() != self.protocol {
            return false;
        }
        if self.restart_observed(header).is_some() {
            return true;
        }
        ready_candidates(header)
            .iter()
            .any(|c| c.frame_number > self.last_consumed)
    }

    /// Copy out new frames according to `mode`.
    pub fn extract<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        mode: ExtractMode,
    ) -> Result<Extraction> {
        let header = source.read_header()?;
        self.check_protocol(&header)?;

        // Nothing is committed to `self` until every copy has succeeded, so a
        // failed extraction sees the same restart again on the next call.
        let mut extraction = Extraction::default();
        let mut baseline = self.last_consumed;
        let mut last_total = self.last_total;
        if let Some(observed) = self.restart_observed(&header) {
            warn!(
                "Producer counters regressed ({} < {}), starting a new session",
                observed,
                self.last_consumed.max(self.last_total)
            );
            extraction.reset = Some(SessionReset {
                last_consumed: self.last_consumed,
                observed,
            });
            baseline = 0;
            last_total = 0;
        }
        if let Header::V2(h) = &header {
            last_total = last_total.max(h.total_frames);
        }

        let mut fresh: Vec<Candidate> = ready_candidates(&header)
            .into_iter()
            .filter(|c| c.frame_number > baseline)
            .collect();
        fresh.sort_unstable_by_key(|c| c.frame_number);
        if mode == ExtractMode::Latest {
            let stale = fresh.len().saturating_sub(1);
            fresh.drain(..stale);
        }

        for candidate in &fresh {
            let end = candidate.offset.checked_add(candidate.len);
            if end.map_or(true, |end| end > source.len()) {
                return Err(Error::ReadFailure(format!(
                    "frame {} declares {} bytes at offset {}, region is {} bytes",
                    candidate.frame_number,
                    candidate.len,
                    candidate.offset,
                    source.len()
                )));
            }
        }

        let mut previous = baseline;
        for candidate in fresh {
            let data = source.copy_out(candidate.offset, candidate.len)?;
            if !Self::still_current(source, &candidate)? {
                warn!(
                    "Frame {} was overwritten while copying, discarding",
                    candidate.frame_number
                );
                extraction.torn += 1;
                continue;
            }
            extraction.dropped += gap(previous, candidate.frame_number);
            previous = candidate.frame_number;
            extraction.frames.push(VideoFrame::new(
                data,
                FrameMetadata {
                    frame_number: candidate.frame_number,
                    width: header.width(),
                    height: header.height(),
                    stride: header.stride(),
                    format: header.pixel_format(),
                    timestamp_ms: candidate.timestamp_ms,
                    slot: candidate.slot,
                },
            ));
        }
        self.last_consumed = previous;
        self.last_total = last_total;
        Ok(extraction)
    }

    /// Fail if `header` is not the revision negotiated at connect time.
    pub fn check_protocol(&self, header: &Header) -> Result<()> {
        if header.protocol() != self.protocol {
            return Err(Mismatch::VersionChanged {
                negotiated: self.protocol.version(),
                found: header.version(),
            }
            .into());
        }
        Ok(())
    }

    /// v1 restarts show as a ready frame numbered below the last consumed
    /// one; v2 restarts as a `total_frames` counter that went backwards.
    fn restart_observed(&self, header: &Header) -> Option<u64> {
        match header {
            Header::V1(h) => {
                (h.ready != 0 && h.frame_number < self.last_consumed).then_some(h.frame_number)
            }
            Header::V2(h) => (h.total_frames < self.last_total).then_some(h.total_frames),
        }
    }

    fn still_current<S: FrameSource + ?Sized>(source: &S, candidate: &Candidate) -> Result<bool> {
        let current = match source.read_header()? {
            Header::V1(h) => Some(h.frame_number),
            Header::V2(h) => candidate
                .slot
                .and_then(|slot| h.slots.get(slot as usize))
                .map(|slot| slot.frame_number),
        };
        Ok(current == Some(candidate.frame_number))
    }
}
