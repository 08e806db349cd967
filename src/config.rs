//! Configuration loading using Figment
//!
//! Settings are layered, later layers winning:
//!
//! 1. Library defaults ([`Settings::default`])
//! 2. A TOML file (`config/vision_daq.toml` unless a path is given), if present
//! 3. Environment variables prefixed `VISIONDAQ_`, with `__` separating nested
//!    keys: `VISIONDAQ_STREAM__FRAME_TIMEOUT=250ms`
//!
//! Durations are written in humantime form ("10ms", "2s").
//!
//! # Example
//! ```no_run
//! use vision_daq::config::Settings;
//!
//! # fn main() -> vision_daq::error::DaqResult<()> {
//! let settings = Settings::load(None)?;
//! println!("Frame timeout: {:?}", settings.stream.frame_timeout);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DaqError, DaqResult};
use crate::hardware::file_access::PollPolicy;
use crate::session::{AcquisitionMode, PixelFormat};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/vision_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "VISIONDAQ_";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Frame buffer pool and frame waits
    #[serde(default)]
    pub stream: StreamSettings,
    /// Register file status polling
    #[serde(default)]
    pub file_access: FileAccessSettings,
    /// Focus lens serial link
    #[serde(default)]
    pub lens: LensSettings,
    /// Camera properties applied when a session opens
    #[serde(default)]
    pub camera: CameraSettings,
}

/// Frame buffer pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Buffers allocated at acquisition start
    pub buffer_count: usize,
    /// Upper bound on every wait for a filled frame
    #[serde(with = "humantime_serde")]
    pub frame_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            buffer_count: 10,
            frame_timeout: Duration::from_secs(5),
        }
    }
}

/// File operation status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAccessSettings {
    /// Sleep between status reads
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Give up after this long with the status still `Busy`
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for FileAccessSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_wait: Duration::from_secs(2),
        }
    }
}

impl From<&FileAccessSettings> for PollPolicy {
    fn from(settings: &FileAccessSettings) -> Self {
        PollPolicy::new(settings.poll_interval, settings.max_wait)
    }
}

/// Focus lens settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensSettings {
    /// File selector of the camera serial port the lens controller listens on
    pub serial_selector: String,
}

impl Default for LensSettings {
    fn default() -> Self {
        Self {
            serial_selector: "SerialPort0".to_string(),
        }
    }
}

/// Optional camera properties. Unset values leave the device as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Pixel format, e.g. "Mono12"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,
    /// Acquisition mode, e.g. "Continuous"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition_mode: Option<String>,
    /// Binning factor, applied to both axes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binning: Option<i64>,
    /// Analog gain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
    /// Exposure time in microseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_time_us: Option<f64>,
    /// Continuous auto exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_exposure: Option<bool>,
    /// Acquisition frame rate in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stream: StreamSettings::default(),
            file_access: FileAccessSettings::default(),
            lens: LensSettings::default(),
            camera: CameraSettings::default(),
        }
    }
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Settings::default()).data()
    }
}

impl Settings {
    /// Load and validate configuration.
    ///
    /// `config_path` defaults to [`DEFAULT_CONFIG_PATH`]. A missing file is not an
    /// error; defaults and environment still apply.
    pub fn load(config_path: Option<&Path>) -> DaqResult<Self> {
        let settings: Settings = Self::figment(config_path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered provider chain used by [`Settings::load`].
    #[must_use]
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Settings::default());

        let file_path = config_path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);
        if file_path.exists() {
            figment = figment.merge(Toml::file(&file_path));
        } else {
            warn!(path = %file_path.display(), "Config file not found, using defaults");
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check ranges and enumerations.
    pub fn validate(&self) -> DaqResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.stream.buffer_count == 0 {
            return Err(DaqError::Configuration(
                "stream.buffer_count must be at least 1".into(),
            ));
        }
        if self.stream.frame_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "stream.frame_timeout must be greater than zero".into(),
            ));
        }

        let poll = &self.file_access;
        if poll.poll_interval.is_zero() {
            return Err(DaqError::Configuration(
                "file_access.poll_interval must be greater than zero".into(),
            ));
        }
        if poll.max_wait < poll.poll_interval {
            return Err(DaqError::Configuration(format!(
                "file_access.max_wait ({:?}) is shorter than poll_interval ({:?})",
                poll.max_wait, poll.poll_interval
            )));
        }

        if self.lens.serial_selector.trim().is_empty() {
            return Err(DaqError::Configuration(
                "lens.serial_selector cannot be empty".into(),
            ));
        }

        self.camera.validate()
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> DaqResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("Failed to serialize settings: {e}")))
    }

    /// Status poll bounds for register file channels.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::from(&self.file_access)
    }
}

impl CameraSettings {
    fn validate(&self) -> DaqResult<()> {
        if let Some(format) = &self.pixel_format {
            format.parse::<PixelFormat>()?;
        }
        if let Some(mode) = &self.acquisition_mode {
            mode.parse::<AcquisitionMode>()?;
        }
        if let Some(binning) = self.binning {
            if binning < 1 {
                return Err(DaqError::Configuration(format!(
                    "camera.binning must be at least 1, got {binning}"
                )));
            }
        }
        if let Some(gain) = self.gain {
            if !gain.is_finite() || gain < 0.0 {
                return Err(DaqError::Configuration(format!(
                    "camera.gain must be a non-negative number, got {gain}"
                )));
            }
        }
        if let Some(exposure) = self.exposure_time_us {
            if !exposure.is_finite() || exposure <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "camera.exposure_time_us must be positive, got {exposure}"
                )));
            }
        }
        if let Some(rate) = self.frame_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "camera.frame_rate must be positive, got {rate}"
                )));
            }
        }
        Ok(())
    }
}
