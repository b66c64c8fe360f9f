//! Error model for the frame receiver

use thiserror::Error;

/// Why a header was refused by the codec or the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Mismatch {
    /// Not the expected application at all.
    #[error("invalid magic number 0x{found:08X}, expected 0x{expected:08X}")]
    BadMagic { found: u32, expected: u32 },

    /// Right application, incompatible revision.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("header truncated: need {needed} bytes, region has {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid layout: {0}")]
    Layout(String),

    #[error("protocol version changed from {negotiated} to {found} while connected")]
    VersionChanged { negotiated: u32, found: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    /// The shared region does not exist: the producer is not streaming.
    #[error("producer is not running: shared region `{name}` not found")]
    NotRunning { name: String },

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(#[from] Mismatch),

    /// Mapping or copy failed mid-operation.
    #[error("read failure: {0}")]
    ReadFailure(String),

    #[error("receiver is not connected")]
    NotConnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
