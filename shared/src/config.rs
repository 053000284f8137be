use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::{
    CONTACT_STAGGER_MS, DEFAULT_APP_NAME, DEFAULT_MAP_BASE_URL, DEFAULT_MESSAGE_BASE_URL,
    HOLD_THRESHOLD_MS, HOLD_TICK_MS, LOCATION_TIMEOUT_MS, MAX_CONTACTS_PER_OWNER,
    MAX_HISTORY_ENTRIES, MESSAGE_OFFSET_MS, PRESS_VIBRATION_MS, SUCCESS_WINDOW_MS,
    TRIGGER_VIBRATION_PATTERN_MS,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid url for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Timing and limits of the SOS core. Values are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SosConfig {
    pub hold_threshold_ms: u64,
    pub tick_interval_ms: u64,
    pub location_timeout_ms: u64,
    pub contact_stagger_ms: u64,
    pub message_offset_ms: u64,
    pub success_window_ms: u64,
    pub history_capacity: usize,
    pub max_contacts: usize,
    pub map_base_url: String,
    pub message_base_url: String,
    pub app_name: String,
    pub press_vibration_ms: u64,
    pub trigger_vibration_pattern_ms: Vec<u64>,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            hold_threshold_ms: HOLD_THRESHOLD_MS,
            tick_interval_ms: HOLD_TICK_MS,
            location_timeout_ms: LOCATION_TIMEOUT_MS,
            contact_stagger_ms: CONTACT_STAGGER_MS,
            message_offset_ms: MESSAGE_OFFSET_MS,
            success_window_ms: SUCCESS_WINDOW_MS,
            history_capacity: MAX_HISTORY_ENTRIES,
            max_contacts: MAX_CONTACTS_PER_OWNER,
            map_base_url: DEFAULT_MAP_BASE_URL.to_string(),
            message_base_url: DEFAULT_MESSAGE_BASE_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            press_vibration_ms: PRESS_VIBRATION_MS,
            trigger_vibration_pattern_ms: TRIGGER_VIBRATION_PATTERN_MS.to_vec(),
        }
    }
}

impl SosConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_threshold_ms == 0 {
            return Err(ConfigError::Invalid("hold_threshold_ms must be > 0".into()));
        }
        if self.tick_interval_ms == 0 || self.tick_interval_ms >= self.hold_threshold_ms {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be > 0 and < hold_threshold_ms".into(),
            ));
        }
        if self.location_timeout_ms == 0 {
            return Err(ConfigError::Invalid("location_timeout_ms must be > 0".into()));
        }
        if self.message_offset_ms == 0 || self.message_offset_ms >= self.contact_stagger_ms {
            return Err(ConfigError::Invalid(
                "message_offset_ms must be > 0 and < contact_stagger_ms".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be > 0".into()));
        }
        if self.max_contacts == 0 {
            return Err(ConfigError::Invalid("max_contacts must be > 0".into()));
        }
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name cannot be empty".into()));
        }
        Self::check_url("map_base_url", &self.map_base_url)?;
        Self::check_url("message_base_url", &self.message_base_url)?;
        Ok(())
    }

    fn check_url(field: &'static str, raw: &str) -> Result<(), ConfigError> {
        let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            field,
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "https" {
            return Err(ConfigError::InvalidUrl {
                field,
                reason: format!("scheme must be https, got {}", parsed.scheme()),
            });
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(ConfigError::InvalidUrl {
                field,
                reason: "base url cannot carry a query or fragment".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }

    #[must_use]
    pub const fn contact_stagger(&self) -> Duration {
        Duration::from_millis(self.contact_stagger_ms)
    }

    #[must_use]
    pub const fn message_offset(&self) -> Duration {
        Duration::from_millis(self.message_offset_ms)
    }

    #[must_use]
    pub const fn success_window(&self) -> Duration {
        Duration::from_millis(self.success_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SosConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hold_threshold(), Duration::from_secs(3));
        assert_eq!(config.location_timeout(), Duration::from_secs(10));
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.max_contacts, 5);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = SosConfig::from_json(r#"{ "success_window_ms": 5000 }"#).unwrap();
        assert_eq!(config.success_window_ms, 5000);
        assert_eq!(config.contact_stagger_ms, 4000);
        assert_eq!(config.message_base_url, "https://wa.me");
    }

    #[test]
    fn tick_must_be_shorter_than_threshold() {
        let config = SosConfig {
            tick_interval_ms: 3000,
            ..SosConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn message_offset_must_fit_inside_stagger() {
        let config = SosConfig {
            message_offset_ms: 4000,
            ..SosConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_urls_are_checked() {
        let config = SosConfig {
            map_base_url: "not a url".into(),
            ..SosConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl {
                field: "map_base_url",
                ..
            })
        ));

        let config = SosConfig {
            message_base_url: "http://wa.me".into(),
            ..SosConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            SosConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
