//! Configuration for Sensing Flux

use crate::error::ConfigError;
use crate::schema::Stream;
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::env;

/// Canonical zone of every output timestamp unless configured otherwise
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Zurich;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Target zone for all normalized instants
    pub timezone: Tz,

    /// Streams kept in the output; `None` keeps all of them
    pub enabled_streams: Option<BTreeSet<Stream>>,

    /// Log level (used by the CLI subscriber)
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            enabled_streams: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key → value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        if let Some(tz) = lookup("FLUX_TIMEZONE") {
            config.timezone = parse_timezone(&tz)?;
        }

        if let Some(streams) = lookup("FLUX_STREAMS") {
            config.enabled_streams = parse_streams(&streams)?;
        }

        if let Some(level) = lookup("FLUX_LOG_LEVEL") {
            config.log_level = parse_log_level(&level)?;
        }

        Ok(config)
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_streams(mut self, streams: impl IntoIterator<Item = Stream>) -> Self {
        self.enabled_streams = Some(streams.into_iter().collect());
        self
    }

    pub fn is_enabled(&self, stream: Stream) -> bool {
        self.enabled_streams
            .as_ref()
            .map_or(true, |enabled| enabled.contains(&stream))
    }
}

/// Parse an IANA zone name
pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
}

/// Parse a comma-separated stream list; empty or `all` means every stream
pub fn parse_streams(list: &str) -> Result<Option<BTreeSet<Stream>>, ConfigError> {
    let list = list.trim();
    if list.is_empty() || list.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<Stream>()
                .map_err(|_| ConfigError::UnknownStream(name.to_string()))
        })
        .collect::<Result<BTreeSet<_>, _>>()
        .map(Some)
}

pub fn parse_log_level(level: &str) -> Result<String, ConfigError> {
    let level = level.trim().to_ascii_lowercase();
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(ConfigError::InvalidLogLevel(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.timezone, chrono_tz::Europe::Zurich);
        assert_eq!(config.enabled_streams, None);
        assert_eq!(config.log_level, "info");
        assert!(config.is_enabled(Stream::Sms));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("FLUX_TIMEZONE", "America/New_York"),
            ("FLUX_STREAMS", "location, battery_level"),
            ("FLUX_LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();

        assert_eq!(config.timezone, chrono_tz::America::New_York);
        assert!(config.is_enabled(Stream::Location));
        assert!(config.is_enabled(Stream::BatteryLevel));
        assert!(!config.is_enabled(Stream::Sms));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("FLUX_TIMEZONE", "Mars/Olympus")])),
            Err(ConfigError::InvalidTimezone(_))
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("FLUX_STREAMS", "LOCATION,GPS")])),
            Err(ConfigError::UnknownStream(name)) if name == "GPS"
        ));
        assert!(matches!(
            EngineConfig::from_lookup(lookup(&[("FLUX_LOG_LEVEL", "loud")])),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_all_means_no_filter() {
        assert_eq!(parse_streams("all").unwrap(), None);
        assert_eq!(parse_streams("").unwrap(), None);
    }
}
