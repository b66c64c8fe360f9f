pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod shm;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{FrameReceiver, ReceiverEvent, VideoFrame};
pub use error::{Error, Mismatch, Result};
pub use protocol::{ExtractMode, Protocol};

/// Well-known name of the producer's shared memory region
pub const REGION_NAME: &str = "ChiakiFrameShare";
/// Well-known name of the producer's frame notification
pub const EVENT_NAME: &str = "ChiakiFrameEvent";

/// Prefix for environment overrides, e.g. `FRAMESHARE__DEMO__MODE=all_new`
const ENV_PREFIX: &str = "FRAMESHARE";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub region_name: String,
    /// `None` disables the event and always polls
    pub event_name: Option<String>,
    /// Open `shm_dir/region_name` as a plain file instead of a POSIX shm object
    pub shm_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub connect_attempts: u32,
    pub retry_interval_ms: u64,
    pub wait_timeout_ms: u64,
    pub mode: ExtractMode,
    /// Save every N-th frame as PNG, 0 disables
    pub screenshot_every: u64,
    pub screenshot_dir: PathBuf,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            region_name: REGION_NAME.into(),
            event_name: Some(EVENT_NAME.into()),
            shm_dir: None,
            poll_interval_ms: 1,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 30,
            retry_interval_ms: 1000,
            wait_timeout_ms: 100,
            mode: ExtractMode::Latest,
            // About every 5 seconds at 60fps
            screenshot_every: 300,
            screenshot_dir: PathBuf::from("."),
        }
    }
}

impl ReceiverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl DemoConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Config {
    /// Defaults, overlaid with an optional TOML file, overlaid with
    /// `FRAMESHARE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_use_well_known_names() {
        let config = Config::default();
        assert_eq!(config.receiver.region_name, "ChiakiFrameShare");
        assert_eq!(config.receiver.event_name.as_deref(), Some("ChiakiFrameEvent"));
        assert_eq!(config.receiver.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.demo.screenshot_every, 300);
    }

    #[test]
    fn file_overrides_only_given_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[receiver]\nshm_dir = \"/tmp/frames\"\n\n[demo]\nmode = \"all_new\"\nwait_timeout_ms = 250"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.receiver.shm_dir, Some(PathBuf::from("/tmp/frames")));
        assert_eq!(config.receiver.region_name, REGION_NAME);
        assert_eq!(config.demo.mode, ExtractMode::AllNew);
        assert_eq!(config.demo.wait_timeout(), Duration::from_millis(250));
        assert_eq!(config.demo.connect_attempts, 30);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/frameshare.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
