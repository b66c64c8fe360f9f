//! Periodic PNG snapshots of received frames

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::capture::decoder;
use crate::capture::VideoFrame;
use crate::error::Result;

/// Saves every `every`-th frame (by producer sequence number) as
/// `frame_<number>.png`.
pub struct ScreenshotSaver {
    dir: PathBuf,
    every: u64,
}

impl ScreenshotSaver {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            dir: dir.into(),
            every,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_due(&self, frame: &VideoFrame) -> bool {
        self.every != 0 && frame.frame_number() % self.every == 0
    }

    /// Save `frame` if its sequence number is due.
    pub fn maybe_save(&self, frame: &VideoFrame) -> Result<Option<PathBuf>> {
        if !self.is_due(frame) {
            return Ok(None);
        }
        self.save(frame).map(Some)
    }

    #[instrument(skip(self, frame), fields(frame = frame.frame_number()))]
    pub fn save(&self, frame: &VideoFrame) -> Result<PathBuf> {
        let image = decoder::decode_frame(frame)?;
        let path = self
            .dir
            .join(format!("frame_{}.png", frame.frame_number()));
        image.save(&path)?;
        info!("Saved: {}", path.display());
        Ok(path)
    }
}
