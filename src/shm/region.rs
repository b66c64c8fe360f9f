//! Read-only view of the producer's shared memory region

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};

use memmap2::{Mmap, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman;
use nix::sys::stat::Mode;
use tracing::debug;

use crate::error::{Error, Mismatch, Result};
use crate::protocol::header::PREAMBLE_LEN;
use crate::protocol::sync::FrameSource;

/// A shared region mapped read-only.
///
/// The producer owns the region's lifetime; dropping this only unmaps the
/// view and closes the descriptor.
pub struct SharedRegion {
    // Field order is drop order: the view goes before the descriptor.
    map: Mmap,
    _file: File,
    name: String,
}

impl SharedRegion {
    /// Open the POSIX shared memory object `/<name>`.
    pub fn open_shm(name: &str) -> Result<Self> {
        let fd = mman::shm_open(format!("/{name}").as_str(), OFlag::O_RDONLY, Mode::empty())
            .map_err(|errno| match errno {
                Errno::ENOENT => Error::NotRunning {
                    name: name.to_string(),
                },
                other => Error::Io(std::io::Error::from(other)),
            })?;
        Self::map(File::from(fd), name)
    }

    /// Open a region backed by a plain file, e.g. one under `/dev/shm` or a
    /// test directory.
    pub fn open_path(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let file = File::open(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => Error::NotRunning { name: name.clone() },
            _ => Error::Io(err),
        })?;
        Self::map(file, &name)
    }

    fn map(file: File, name: &str) -> Result<Self> {
        let len = file.metadata()?.len() as usize;
        if len < PREAMBLE_LEN {
            // Producer created the object but has not sized it yet.
            return Err(Mismatch::Truncated {
                needed: PREAMBLE_LEN,
                available: len,
            }
            .into());
        }
        // SAFETY: the mapping is read-only; concurrent producer writes are
        // only ever observed through copies made in `copy_out`.
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        debug!("Mapped shared region {} ({} bytes)", name, len);
        Ok(Self {
            map,
            _file: file,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FrameSource for SharedRegion {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn copy_out(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::ReadFailure("copy range overflows".into()))?;
        if end > self.map.len() {
            return Err(Error::ReadFailure(format!(
                "copy {offset}..{end} outside region of {} bytes",
                self.map.len()
            )));
        }
        // Pair with the producer's store barrier before it raises ready flags.
        fence(Ordering::Acquire);
        let mut out = vec![0u8; len];
        // SAFETY: bounds checked above; the source is a live mapping and the
        // destination a fresh allocation, so the ranges cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(self.map.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }
}
