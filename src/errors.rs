// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the sensor bridge

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type alias for sensor operations
pub type SensorResult<T> = Result<T, SensorError>;

/// Result type alias for backup source operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Result type alias for presence monitoring
pub type PresenceResult<T> = Result<T, PresenceError>;

/// Exit code for a clean stop or a graceful idle shutdown
pub const EXIT_CLEAN: u8 = 0;

/// Exit code when the sink or the configuration is unusable
pub const EXIT_SETUP_FAILURE: u8 = 1;

/// Exit code when capture failed and no fallback could take over
pub const EXIT_CAPTURE_FAILURE: u8 = 2;

/// Main application error type
#[derive(Debug)]
pub enum AppError {
    /// Virtual sink errors
    Sink(SinkError),
    /// Primary sensor errors
    Sensor(SensorError),
    /// Backup capture device errors
    Backup(BackupError),
    /// Consumer presence monitor errors
    Presence(PresenceError),
    /// Configuration errors
    Config(ConfigError),
    /// Generic error with message
    Other(String),
}

/// Errors raised by the virtual sink
#[derive(Debug)]
pub enum SinkError {
    /// Device node could not be opened
    OpenFailed { path: String, source: std::io::Error },
    /// Driver rejected the output format
    FormatRejected { path: String, source: std::io::Error },
    /// Write failed for a reason other than backpressure
    WriteFailed(std::io::Error),
    /// Write accepted zero bytes
    ShortWrite { written: usize, expected: usize },
}

/// Errors raised by the primary sensor
#[derive(Debug)]
pub enum SensorError {
    /// No sensor was found during enumeration
    NotFound,
    /// Sensor was found but could not be opened
    OpenFailed(String),
    /// Requested stream is not provided by the sensor
    StreamUnavailable(String),
    /// Stream could not be started
    StartFailed(String),
    /// Error while waiting for or reading a frame
    StreamFailed(String),
    /// Stop or close failed
    ReleaseFailed(String),
}

/// Errors raised by the backup capture device
#[derive(Debug)]
pub enum BackupError {
    /// Device node could not be opened
    OpenFailed { path: String, reason: String },
    /// Current format could not be queried
    FormatQuery(String),
    /// Granted format is not one of the known layouts
    UnsupportedFormat(String),
    /// Capture buffers could not be requested, mapped, or queued
    Buffers(String),
    /// Streaming failed after it started
    Stream(String),
    /// Sink rejected a frame
    Sink(SinkError),
}

/// Errors raised by the consumer presence monitor
#[derive(Debug)]
pub enum PresenceError {
    /// Watch could not be installed on the sink path
    WatchFailed { path: String, source: std::io::Error },
    /// Reading notifications failed
    ReadFailed(std::io::Error),
    /// Monitor thread could not be spawned
    SpawnFailed(std::io::Error),
    /// Monitor stopped observing the sink while the session was running
    MonitorLost(String),
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    Read { path: String, source: std::io::Error },
    /// Configuration file is not valid JSON for [`crate::config::Config`]
    Parse { path: String, source: serde_json::Error },
    /// A value is outside its accepted range
    Invalid(String),
}

impl AppError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Sink(SinkError::OpenFailed { .. })
            | AppError::Sink(SinkError::FormatRejected { .. })
            | AppError::Config(_) => EXIT_SETUP_FAILURE,
            AppError::Presence(_) => EXIT_SETUP_FAILURE,
            _ => EXIT_CAPTURE_FAILURE,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Sink(e) => write!(f, "Sink error: {}", e),
            AppError::Sensor(e) => write!(f, "Sensor error: {}", e),
            AppError::Backup(e) => write!(f, "Backup device error: {}", e),
            AppError::Presence(e) => write!(f, "Presence monitor error: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::OpenFailed { path, source } => {
                write!(f, "Failed to open {}: {}", path, source)
            }
            SinkError::FormatRejected { path, source } => {
                write!(f, "Failed to set output format on {}: {}", path, source)
            }
            SinkError::WriteFailed(e) => write!(f, "Write failed: {}", e),
            SinkError::ShortWrite { written, expected } => {
                write!(f, "Short write: {} of {} bytes", written, expected)
            }
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::NotFound => write!(f, "No sensor found"),
            SensorError::OpenFailed(msg) => write!(f, "Open failed: {}", msg),
            SensorError::StreamUnavailable(msg) => write!(f, "Stream unavailable: {}", msg),
            SensorError::StartFailed(msg) => write!(f, "Failed to start streams: {}", msg),
            SensorError::StreamFailed(msg) => write!(f, "Stream failed: {}", msg),
            SensorError::ReleaseFailed(msg) => write!(f, "Release failed: {}", msg),
        }
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::OpenFailed { path, reason } => {
                write!(f, "Failed to open {}: {}", path, reason)
            }
            BackupError::FormatQuery(msg) => write!(f, "Format query failed: {}", msg),
            BackupError::UnsupportedFormat(fourcc) => {
                write!(f, "Unsupported pixel format: {}", fourcc)
            }
            BackupError::Buffers(msg) => write!(f, "Buffer setup failed: {}", msg),
            BackupError::Stream(msg) => write!(f, "Stream failed: {}", msg),
            BackupError::Sink(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for PresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceError::WatchFailed { path, source } => {
                write!(f, "Failed to watch {}: {}", path, source)
            }
            PresenceError::ReadFailed(e) => write!(f, "Failed to read events: {}", e),
            PresenceError::SpawnFailed(e) => write!(f, "Failed to spawn monitor: {}", e),
            PresenceError::MonitorLost(reason) => write!(f, "Presence monitor lost: {}", reason),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => write!(f, "Failed to read {}: {}", path, source),
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse {}: {}", path, source)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid value: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for SensorError {}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::OpenFailed { source, .. } | SinkError::FormatRejected { source, .. } => {
                Some(source)
            }
            SinkError::WriteFailed(e) => Some(e),
            SinkError::ShortWrite { .. } => None,
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Sink(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for PresenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PresenceError::WatchFailed { source, .. } => Some(source),
            PresenceError::ReadFailed(e) | PresenceError::SpawnFailed(e) => Some(e),
            PresenceError::MonitorLost(_) => None,
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

// Conversions from sub-errors to AppError
impl From<SinkError> for AppError {
    fn from(err: SinkError) -> Self {
        AppError::Sink(err)
    }
}

impl From<SensorError> for AppError {
    fn from(err: SensorError) -> Self {
        AppError::Sensor(err)
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        AppError::Backup(err)
    }
}

impl From<PresenceError> for AppError {
    fn from(err: PresenceError) -> Self {
        AppError::Presence(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<SinkError> for BackupError {
    fn from(err: SinkError) -> Self {
        BackupError::Sink(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
