//! Verifier process configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file) is a valid configuration. The CLI layers its flags on top.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::notify::ExchangeSpec;
use crate::reconciler::DEFAULT_RECONCILER_CONFIG;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Unit of the settle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleUnit {
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl fmt::Display for SettleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Microseconds => "microseconds",
            Self::Milliseconds => "milliseconds",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        })
    }
}

/// How long a snapshot must age past its audit period end before it is
/// eligible, so late corroborating records have time to land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleWindow {
    pub amount: u32,
    pub unit: SettleUnit,
}

impl SettleWindow {
    pub fn duration(&self) -> time::Duration {
        let amount = i64::from(self.amount);
        match self.unit {
            SettleUnit::Microseconds => time::Duration::microseconds(amount),
            SettleUnit::Milliseconds => time::Duration::milliseconds(amount),
            SettleUnit::Seconds => time::Duration::seconds(amount),
            SettleUnit::Minutes => time::Duration::minutes(amount),
            SettleUnit::Hours => time::Duration::hours(amount),
            SettleUnit::Days => time::Duration::days(amount),
            SettleUnit::Weeks => time::Duration::weeks(amount),
        }
    }

    /// Whether `now` minus this window is still a representable time.
    pub fn fits_before(&self, now: OffsetDateTime) -> bool {
        now.checked_sub(self.duration()).is_some()
    }
}

impl fmt::Display for SettleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}

/// Message-broker connection and exchange parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub userid: String,
    pub password: String,
    pub virtual_host: String,
    pub exchange_name: String,
    pub exchange_type: String,
    pub durable_queue: bool,
    /// Publish to these keys instead of each message's own routing key.
    pub routing_keys: Option<Vec<String>>,
    /// Where the spool publisher writes; stdout when unset.
    pub spool_path: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            userid: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            exchange_name: "monitor".to_string(),
            exchange_type: "topic".to_string(),
            durable_queue: true,
            routing_keys: None,
            spool_path: None,
        }
    }
}

impl BrokerConfig {
    pub fn exchange(&self) -> ExchangeSpec {
        ExchangeSpec {
            name: self.exchange_name.clone(),
            kind: self.exchange_type.clone(),
            durable: self.durable_queue,
        }
    }

    /// Connection URL without the password, for logs.
    pub fn display_url(&self) -> String {
        format!(
            "amqp://{}@{}:{}/{}",
            self.userid,
            self.host,
            self.port,
            self.virtual_host.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Seconds to sleep between cycles.
    pub tick_time: u64,
    pub settle_time: u32,
    pub settle_units: SettleUnit,
    pub pool_size: usize,
    pub run_once: bool,
    /// Escalate failed snapshots to the reconciler.
    pub reconcile: bool,
    pub reconciler_config: PathBuf,
    pub enable_notifications: bool,
    pub broker: Option<BrokerConfig>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            tick_time: 30,
            settle_time: 10,
            settle_units: SettleUnit::Minutes,
            pool_size: 10,
            run_once: false,
            reconcile: false,
            reconciler_config: PathBuf::from(DEFAULT_RECONCILER_CONFIG),
            enable_notifications: false,
            broker: None,
        }
    }
}

impl VerifierConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".to_string()));
        }
        if self.enable_notifications && self.broker.is_none() {
            return Err(ConfigError::Invalid(
                "enable_notifications requires a [broker] section".to_string(),
            ));
        }
        let settle = self.settle_window();
        if !settle.fits_before(OffsetDateTime::now_utc()) {
            return Err(ConfigError::Invalid(format!(
                "settle window of {settle} is out of range"
            )));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_time)
    }

    pub fn settle_window(&self) -> SettleWindow {
        SettleWindow {
            amount: self.settle_time,
            unit: self.settle_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = VerifierConfig::from_toml_str("").unwrap();
        assert_eq!(config, VerifierConfig::default());
        assert_eq!(config.tick(), Duration::from_secs(30));
        assert_eq!(config.settle_window().duration(), time::Duration::minutes(10));
    }

    #[test]
    fn parses_full_config() {
        let config = VerifierConfig::from_toml_str(
            r#"
            tick_time = 5
            settle_time = 2
            settle_units = "hours"
            pool_size = 4
            run_once = true
            reconcile = true
            reconciler_config = "/tmp/rec.json"
            enable_notifications = true

            [broker]
            host = "rabbit.internal"
            userid = "verifier"
            exchange_name = "nova"
            routing_keys = ["notifications.info", "billing.info"]
            "#,
        )
        .unwrap();

        assert_eq!(config.tick(), Duration::from_secs(5));
        assert_eq!(config.settle_window().duration(), time::Duration::hours(2));
        assert_eq!(config.pool_size, 4);
        assert!(config.run_once && config.reconcile);
        assert_eq!(config.reconciler_config, PathBuf::from("/tmp/rec.json"));

        let broker = config.broker.unwrap();
        assert_eq!(broker.port, 5672);
        assert_eq!(broker.display_url(), "amqp://verifier@rabbit.internal:5672/");
        assert_eq!(
            broker.exchange(),
            ExchangeSpec {
                name: "nova".to_string(),
                kind: "topic".to_string(),
                durable: true,
            }
        );
        assert_eq!(broker.routing_keys.unwrap().len(), 2);
    }

    #[test]
    fn rejects_zero_pool_size() {
        let err = VerifierConfig::from_toml_str("pool_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn notifications_need_a_broker() {
        let err = VerifierConfig::from_toml_str("enable_notifications = true").unwrap_err();
        assert!(err.to_string().contains("[broker]"));
    }

    #[test]
    fn unknown_settle_unit_is_a_parse_error() {
        let err = VerifierConfig::from_toml_str("settle_units = \"fortnights\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn settle_units_convert() {
        let window = |amount, unit| SettleWindow { amount, unit }.duration();
        assert_eq!(window(3, SettleUnit::Seconds), time::Duration::seconds(3));
        assert_eq!(window(1, SettleUnit::Weeks), time::Duration::days(7));
        assert_eq!(window(250, SettleUnit::Milliseconds), time::Duration::milliseconds(250));
    }

    #[test]
    fn rejects_settle_window_past_the_calendar() {
        let err = VerifierConfig::from_toml_str(
            "settle_time = 1000000\nsettle_units = \"weeks\"",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("1000000 weeks"), "{err}");

        // A century is long but still fine.
        VerifierConfig::from_toml_str("settle_time = 5200\nsettle_units = \"weeks\"").unwrap();
    }
}
