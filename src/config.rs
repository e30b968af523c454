// SPDX-License-Identifier: GPL-3.0-only

//! Runtime configuration
//!
//! Defaults come from [`crate::constants`]. An optional JSON file overrides
//! them and command line arguments override the file.

use crate::constants::{
    BACKUP_WAIT, BLANK_CHROMA, CAPTURE_BUFFER_COUNT, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    FRAME_TIMEOUT, FRAME_TIMEOUT_WITH_BACKUP, IDLE_TIMEOUT, MAX_MISSED_FRAMES,
    PRESENCE_POLL_INTERVAL, WATCHDOG_GRACE,
};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Sensor stream that feeds the sink
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Infrared intensity, delivered as float grayscale
    #[default]
    Infrared,
    /// Color, delivered as packed 32-bit BGRX
    Color,
}

/// How consumers of the sink are detected
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStrategy {
    /// Open/close notifications on the sink path
    #[default]
    Events,
    /// Periodic scan of every process's open descriptors
    Poll,
}

/// Timeouts and bounds of the capture lifecycle
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Timing {
    /// Frame wait timeout without a backup source, in milliseconds
    pub frame_timeout_ms: u64,
    /// Frame wait timeout with a backup source, in milliseconds
    pub frame_timeout_with_backup_ms: u64,
    /// Consecutive missed frames treated as sensor loss
    pub max_missed_frames: u32,
    /// Seconds without a delivered frame before the session drains
    pub idle_timeout_secs: u64,
    /// Grace period before a stalled shutdown is killed, in milliseconds
    pub watchdog_grace_ms: u64,
    /// Interval of the descriptor scan, in milliseconds
    pub presence_poll_interval_ms: u64,
    /// Bounded wait for a filled backup buffer, in milliseconds
    pub backup_wait_ms: u64,
    /// Memory-mapped buffers requested from the backup device
    pub backup_buffer_count: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            frame_timeout_ms: FRAME_TIMEOUT.as_millis() as u64,
            frame_timeout_with_backup_ms: FRAME_TIMEOUT_WITH_BACKUP.as_millis() as u64,
            max_missed_frames: MAX_MISSED_FRAMES,
            idle_timeout_secs: IDLE_TIMEOUT.as_secs(),
            watchdog_grace_ms: WATCHDOG_GRACE.as_millis() as u64,
            presence_poll_interval_ms: PRESENCE_POLL_INTERVAL.as_millis() as u64,
            backup_wait_ms: BACKUP_WAIT.as_millis() as u64,
            backup_buffer_count: CAPTURE_BUFFER_COUNT,
        }
    }
}

impl Timing {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_millis(self.watchdog_grace_ms)
    }

    pub fn presence_poll_interval(&self) -> Duration {
        Duration::from_millis(self.presence_poll_interval_ms)
    }

    pub fn backup_wait(&self) -> Duration {
        Duration::from_millis(self.backup_wait_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Virtual sink device node (v4l2loopback)
    pub sink_path: PathBuf,
    /// Fallback capture device used when the sensor is missing or lost
    pub backup_path: Option<PathBuf>,
    /// Explicit sensor node; discovered when unset
    pub sensor_path: Option<PathBuf>,
    /// Which sensor stream feeds the sink
    pub stream: StreamKind,
    /// Consumer detection strategy
    pub presence: PresenceStrategy,
    /// Convert sensor frames on the GPU when available
    pub hw_accel: bool,
    /// Chroma value of the blank frame (0x80 neutral, 0 for no bias)
    pub blank_chroma: u8,
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sink_path: PathBuf::new(),
            backup_path: None,
            sensor_path: None,
            stream: StreamKind::default(),
            presence: PresenceStrategy::default(),
            hw_accel: false,
            blank_chroma: BLANK_CHROMA,
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or from the per-user
    /// configuration directory when it holds one
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file yields the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => {
                    debug!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Parse a JSON configuration file; absent fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Frame wait timeout, shortened when a backup source can take over
    pub fn frame_timeout(&self) -> Duration {
        if self.backup_path.is_some() {
            Duration::from_millis(self.timing.frame_timeout_with_backup_ms)
        } else {
            Duration::from_millis(self.timing.frame_timeout_ms)
        }
    }

    /// Reject values the capture lifecycle cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("sink path is empty".into()));
        }
        if self
            .backup_path
            .as_deref()
            .is_some_and(|backup| same_node(backup, &self.sink_path))
        {
            return Err(ConfigError::Invalid(
                "backup path must differ from the sink path".into(),
            ));
        }

        let t = &self.timing;
        let zero = [
            ("frame_timeout_ms", t.frame_timeout_ms),
            ("frame_timeout_with_backup_ms", t.frame_timeout_with_backup_ms),
            ("idle_timeout_secs", t.idle_timeout_secs),
            ("watchdog_grace_ms", t.watchdog_grace_ms),
            ("presence_poll_interval_ms", t.presence_poll_interval_ms),
            ("backup_wait_ms", t.backup_wait_ms),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((name, _)) = zero {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }
        if t.max_missed_frames == 0 {
            return Err(ConfigError::Invalid(
                "max_missed_frames must be greater than 0".into(),
            ));
        }
        if t.backup_buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "backup_buffer_count must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Whether two paths name the same node once symlinks and `..` are resolved
///
/// Paths that cannot be resolved yet are compared as written.
fn same_node(a: &Path, b: &Path) -> bool {
    let resolve = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    resolve(a) == resolve(b)
}

/// `$XDG_CONFIG_HOME/sensor-loopback/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_sink() -> Config {
        Config {
            sink_path: PathBuf::from("/dev/video20"),
            ..Config::default()
        }
    }

    #[test]
    fn test_frame_timeout_shortens_with_backup() {
        let mut config = with_sink();
        assert_eq!(config.frame_timeout(), Duration::from_millis(1000));
        config.backup_path = Some(PathBuf::from("/dev/video0"));
        assert_eq!(config.frame_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(
            r#"{
                "sink_path": "/dev/video9",
                "stream": "color",
                "timing": { "idle_timeout_secs": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.sink_path, PathBuf::from("/dev/video9"));
        assert_eq!(config.stream, StreamKind::Color);
        assert_eq!(config.timing.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.timing.max_missed_frames, MAX_MISSED_FRAMES);
        assert_eq!(config.presence, PresenceStrategy::Events);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = with_sink();
        config.timing.watchdog_grace_ms = 0;
        assert!(config.validate().is_err());

        let mut config = with_sink();
        config.timing.max_missed_frames = 0;
        assert!(config.validate().is_err());

        assert!(with_sink().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_backup_equal_to_sink() {
        let mut config = with_sink();
        config.backup_path = Some(config.sink_path.clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_backup_aliasing_sink() {
        let dir = std::env::temp_dir()
            .join(format!("sensor-loopback-alias-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let node = dir.join("video20");
        let link = dir.join("by-id-camera");
        std::fs::write(&node, b"").unwrap();
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&node, &link).unwrap();

        let mut config = with_sink();
        config.sink_path = node.clone();
        config.backup_path = Some(link);
        let via_symlink = config.validate();
        config.backup_path = Some(dir.join(".").join("video20"));
        let via_dot = config.validate();
        config.backup_path = Some(dir.join("video0"));
        let distinct = config.validate();
        let _ = std::fs::remove_dir_all(&dir);

        assert!(via_symlink.is_err());
        assert!(via_dot.is_err());
        assert!(distinct.is_ok());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/sensor-loopback.json")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
