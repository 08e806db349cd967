//! Global subscriber installation
//!
//! Kept in its own test binary: it installs the process-wide subscriber.

use tracing::Level;
use vision_daq::config::Settings;
use vision_daq::logging::{self, LoggingConfig, OutputFormat};

#[test]
fn test_init_is_idempotent() {
    let config = LoggingConfig::new(Level::WARN).with_format(OutputFormat::Compact);
    assert!(logging::init(config.clone()).is_ok());
    assert!(logging::init(config.with_format(OutputFormat::Json)).is_ok());
    assert!(logging::init_from_settings(&Settings::default()).is_ok());

    tracing::warn!(component = "test", "Logging initialized");
}

#[test]
fn test_invalid_level_is_rejected_before_install() {
    let settings = Settings {
        log_level: "loud".to_string(),
        ..Settings::default()
    };
    assert!(logging::init_from_settings(&settings).is_err());
}
