//! Drive client configuration.
//!
//! [`DriveConfig`] holds everything needed to reach one CSD-MT-94 and to
//! sequence it: network endpoint, Modbus unit id, exchange timeout, unit
//! conversion constants and the bounds of the polling loops. It can be built
//! in code or loaded from JSON.
//!
//! ```json
//! {
//!     "host": "192.168.1.10",
//!     "steps_per_revolution": 12800,
//!     "millimetres_per_revolution": 5.0
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};
use crate::protocol::UnitId;

fn default_port() -> u16 {
    crate::DEFAULT_TCP_PORT
}

fn default_unit_id() -> UnitId {
    crate::DEFAULT_UNIT_ID
}

fn default_timeout_ms() -> u64 {
    crate::DEFAULT_TIMEOUT_MS
}

fn default_max_transition_attempts() -> u32 {
    crate::DEFAULT_TRANSITION_ATTEMPTS
}

fn default_state_poll_interval_ms() -> u64 {
    10
}

fn default_setpoint_ack_attempts() -> u32 {
    50
}

fn default_parameter_save_delay_ms() -> u64 {
    5000
}

/// Connection and sequencing settings for one drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    /// IP address or host name of the controller
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit identifier (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: UnitId,

    /// Per-exchange timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Required for angular and linear units
    #[serde(default)]
    pub steps_per_revolution: Option<u32>,

    /// Required for linear units
    #[serde(default)]
    pub millimetres_per_revolution: Option<f64>,

    /// Bound of the enable-operation loop
    #[serde(default = "default_max_transition_attempts")]
    pub max_transition_attempts: u32,

    /// Delay between a state command and the confirming status read
    #[serde(default = "default_state_poll_interval_ms")]
    pub state_poll_interval_ms: u64,

    /// Status reads before a new set-point counts as not acknowledged
    #[serde(default = "default_setpoint_ack_attempts")]
    pub setpoint_ack_attempts: u32,

    /// Wait after storing parameters or restoring defaults
    #[serde(default = "default_parameter_save_delay_ms")]
    pub parameter_save_delay_ms: u64,

    /// Hex dump of every frame through `tracing`
    #[serde(default)]
    pub packet_logging: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            steps_per_revolution: None,
            millimetres_per_revolution: None,
            max_transition_attempts: default_max_transition_attempts(),
            state_poll_interval_ms: default_state_poll_interval_ms(),
            setpoint_ack_attempts: default_setpoint_ack_attempts(),
            parameter_save_delay_ms: default_parameter_save_delay_ms(),
            packet_logging: false,
        }
    }
}

impl DriveConfig {
    /// Configuration for `host` with every other field at its default
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_steps_per_revolution(mut self, steps: u32) -> Self {
        self.steps_per_revolution = Some(steps);
        self
    }

    pub fn with_millimetres_per_revolution(mut self, millimetres: f64) -> Self {
        self.millimetres_per_revolution = Some(millimetres);
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> DriveResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DriveResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriveError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// Check field ranges
    ///
    /// # Errors
    ///
    /// `DriveError::Config` naming the first offending field.
    pub fn validate(&self) -> DriveResult<()> {
        if self.host.trim().is_empty() {
            return Err(DriveError::config("host cannot be empty"));
        }
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(DriveError::config(format!(
                "unit_id {} out of range (1-247)",
                self.unit_id
            )));
        }
        if self.timeout_ms == 0 {
            return Err(DriveError::config("timeout_ms must be positive"));
        }
        if self.steps_per_revolution == Some(0) {
            return Err(DriveError::config("steps_per_revolution must be positive"));
        }
        if let Some(mm) = self.millimetres_per_revolution {
            if !(mm.is_finite() && mm > 0.0) {
                return Err(DriveError::config("millimetres_per_revolution must be positive"));
            }
        }
        if self.max_transition_attempts == 0 {
            return Err(DriveError::config("max_transition_attempts must be positive"));
        }
        if self.setpoint_ack_attempts == 0 {
            return Err(DriveError::config("setpoint_ack_attempts must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms)
    }

    pub fn parameter_save_delay(&self) -> Duration {
        Duration::from_millis(self.parameter_save_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = DriveConfig::from_json_str(r#"{ "host": "10.0.0.5" }"#).unwrap();
        assert_eq!(config, DriveConfig::new("10.0.0.5"));
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.max_transition_attempts, 10);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.steps_per_revolution, None);
    }

    #[test]
    fn test_full_json() {
        let json = r#"{
            "host": "drive.local",
            "port": 1502,
            "unit_id": 7,
            "timeout_ms": 250,
            "steps_per_revolution": 12800,
            "millimetres_per_revolution": 2.5,
            "max_transition_attempts": 4,
            "state_poll_interval_ms": 0,
            "setpoint_ack_attempts": 3,
            "parameter_save_delay_ms": 0,
            "packet_logging": true
        }"#;
        let config = DriveConfig::from_json_str(json).unwrap();
        assert_eq!(config.unit_id, 7);
        assert_eq!(config.millimetres_per_revolution, Some(2.5));
        assert_eq!(config.state_poll_interval(), Duration::ZERO);
        assert!(config.packet_logging);
    }

    #[test]
    fn test_missing_host_is_config_error() {
        let err = DriveConfig::from_json_str(r#"{ "port": 502 }"#).unwrap_err();
        assert!(matches!(err, DriveError::Config { .. }));
    }

    #[test]
    fn test_validation() {
        assert!(DriveConfig::new("").validate().is_err());
        assert!(DriveConfig::new("h").with_unit_id(0).validate().is_err());
        assert!(DriveConfig::new("h").with_unit_id(248).validate().is_err());
        assert!(DriveConfig::new("h").with_unit_id(247).validate().is_ok());
        assert!(DriveConfig::new("h").with_steps_per_revolution(0).validate().is_err());
        assert!(DriveConfig::new("h").with_millimetres_per_revolution(-1.0).validate().is_err());

        let mut config = DriveConfig::new("h");
        config.max_transition_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "host": "192.168.0.20", "steps_per_revolution": 400 }}"#).unwrap();

        let config = DriveConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.host, "192.168.0.20");
        assert_eq!(config.steps_per_revolution, Some(400));

        let err = DriveConfig::from_json_file("/nonexistent/drive.json").unwrap_err();
        assert!(matches!(err, DriveError::Config { .. }));
    }
}
