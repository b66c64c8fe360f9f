//! File-backed stand-in for the streaming application's writer side.

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use tempfile::TempDir;

use frameshare::protocol::header::{V1_HEADER_LEN, V2_HEADER_LEN};
use frameshare::protocol::{HeaderV1, HeaderV2, SlotState, MAGIC, RING_SLOTS};
use frameshare::ReceiverConfig;

pub const REGION: &str = "region";

pub enum Layout {
    V1(HeaderV1),
    V2(HeaderV2),
}

pub struct TestProducer {
    dir: TempDir,
    map: MmapMut,
    pub layout: Layout,
}

fn create_map(dir: &Path, len: usize) -> MmapMut {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(dir.join(REGION))
        .expect("create region file");
    file.set_len(len as u64).expect("size region file");
    unsafe { MmapMut::map_mut(&file).expect("map region file") }
}

impl TestProducer {
    pub fn v1(width: u32, height: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_size = width * height * 4;
        let map = create_map(dir.path(), V1_HEADER_LEN + data_size as usize);
        let header = HeaderV1 {
            magic: MAGIC,
            version: 1,
            width,
            height,
            stride: width * 4,
            format: 0,
            timestamp_ms: 0,
            frame_number: 0,
            data_size,
            ready: 0,
        };
        let mut producer = Self {
            dir,
            map,
            layout: Layout::V1(header),
        };
        producer.flush_header();
        producer
    }

    pub fn v2(width: u32, height: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let frame_data_size = width * height * 4;
        let map = create_map(
            dir.path(),
            V2_HEADER_LEN + RING_SLOTS * frame_data_size as usize,
        );
        let header = HeaderV2 {
            magic: MAGIC,
            version: 2,
            width,
            height,
            stride: width * 4,
            format: 0,
            frame_data_size,
            ring_buffer_size: RING_SLOTS as u32,
            ring_buffer_frame_offset: V2_HEADER_LEN as u32,
            write_index: 0,
            read_index: 0,
            total_frames: 0,
            timestamp_ms: 0,
            slots: [SlotState::default(); RING_SLOTS],
        };
        let mut producer = Self {
            dir,
            map,
            layout: Layout::V2(header),
        };
        producer.flush_header();
        producer
    }

    /// An existing region file with arbitrary contents.
    pub fn raw(bytes: &[u8]) -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut map = create_map(dir.path(), bytes.len());
        map.copy_from_slice(bytes);
        map.flush().expect("flush region");
        dir
    }

    pub fn config(&self) -> ReceiverConfig {
        config_for(self.dir.path())
    }

    pub fn flush_header(&mut self) {
        let bytes = match &self.layout {
            Layout::V1(h) => h.encode(),
            Layout::V2(h) => h.encode(),
        };
        self.map[..bytes.len()].copy_from_slice(&bytes);
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.map[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Publish a v1 frame whose every byte is `fill`.
    pub fn publish_v1(&mut self, frame_number: u64, fill: u8) {
        let Layout::V1(header) = &mut self.layout else {
            panic!("not a v1 producer");
        };
        let len = header.data_size as usize;
        header.frame_number = frame_number;
        header.timestamp_ms = 1_700_000_000_000 + frame_number;
        header.ready = 1;
        self.map[V1_HEADER_LEN..V1_HEADER_LEN + len].fill(fill);
        self.flush_header();
    }

    /// Publish the next v2 frame into the slot at `write_index`.
    pub fn publish_v2(&mut self, frame_number: u64, fill: u8) -> usize {
        let Layout::V2(header) = &mut self.layout else {
            panic!("not a v2 producer");
        };
        let slot = header.write_index as usize;
        let offset = header.slot_offset(slot);
        let len = header.frame_data_size as usize;
        header.slots[slot] = SlotState {
            ready: 1,
            timestamp_ms: 1_700_000_000_000 + frame_number,
            frame_number,
        };
        header.total_frames += 1;
        header.timestamp_ms = 1_700_000_000_000 + frame_number;
        header.write_index = ((slot + 1) % RING_SLOTS) as u32;
        self.map[offset..offset + len].fill(fill);
        self.flush_header();
        slot
    }
}

pub fn config_for(dir: &Path) -> ReceiverConfig {
    ReceiverConfig {
        region_name: REGION.into(),
        event_name: None,
        shm_dir: Some(dir.to_path_buf()),
        poll_interval_ms: 1,
    }
}
