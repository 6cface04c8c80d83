//! Bridge configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/bridge.toml`)
//! 2. environment variables prefixed with `DAQ_BRIDGE_`, nested keys separated by `__`
//!
//! ```text
//! DAQ_BRIDGE_APPLICATION__LOG_LEVEL=debug
//! DAQ_BRIDGE_INSTRUMENT__HOST=10.0.0.7
//! DAQ_BRIDGE_INSTRUMENT__POLL_INTERVAL_MS=2000
//! ```
//!
//! One process bridges one instrument. The `[instrument]` table is tagged by `type`:
//!
//! ```toml
//! [application]
//! name = "mg3692c"
//! log_level = "info"
//!
//! [instrument]
//! type = "signal_generator"
//! model = "mg3692c"
//! host = "10.0.0.5"
//! port = 1
//! connection = "gpib"
//!
//! [instrument.topics]
//! prefix = "mg3692c"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::controller::{ChannelBinding, SignalGeneratorTopics};
use crate::driver::SignalGeneratorModel;
use crate::error::{AppResult, BridgeError};
use crate::transport::prologix::MAX_GPIB_ADDRESS;
use crate::transport::{Endpoint, TransportKind};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "DAQ_BRIDGE_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// The bridged instrument
    pub instrument: InstrumentConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Instrument definition, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentConfig {
    /// E8257D or MG3692C
    SignalGenerator(SignalGeneratorConfig),
    /// Lake Shore 218
    Lakeshore218(Lakeshore218Config),
    /// T&D TR-71W
    Tr71w(Tr71wConfig),
}

/// How a GPIB/LAN instrument is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    /// Through a Prologix GPIB-Ethernet adapter; `port` is the GPIB address
    #[default]
    Gpib,
    /// Direct TCP socket; `port` is the TCP port
    Lan,
}

impl From<Connection> for TransportKind {
    fn from(connection: Connection) -> Self {
        match connection {
            Connection::Gpib => TransportKind::Gpib,
            Connection::Lan => TransportKind::Lan,
        }
    }
}

/// Signal generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalGeneratorConfig {
    /// Instrument model
    pub model: SignalGeneratorModel,
    /// Adapter or instrument host
    pub host: String,
    /// GPIB address (gpib) or TCP port (lan)
    pub port: u16,
    /// Connection kind
    #[serde(default)]
    pub connection: Connection,
    /// Transport timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause between a setter and the confirming query, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Status polling interval in milliseconds; polling is off when absent
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Topic names
    #[serde(default)]
    pub topics: TopicOverrides,
}

/// Signal generator topic names: a prefix plus optional per-topic overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicOverrides {
    /// Prefix for derived names; defaults to the lowercase model name
    #[serde(default)]
    pub prefix: Option<String>,
    /// Frequency status topic
    #[serde(default)]
    pub freq: Option<String>,
    /// Power status topic
    #[serde(default)]
    pub power: Option<String>,
    /// Output status topic
    #[serde(default)]
    pub onoff: Option<String>,
    /// Frequency command topic
    #[serde(default)]
    pub freq_cmd: Option<String>,
    /// Power command topic
    #[serde(default)]
    pub power_cmd: Option<String>,
    /// Output command topic
    #[serde(default)]
    pub onoff_cmd: Option<String>,
}

/// Lake Shore 218 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lakeshore218Config {
    /// Adapter or instrument host
    pub host: String,
    /// GPIB address (gpib) or TCP port (lan)
    pub port: u16,
    /// Connection kind
    #[serde(default)]
    pub connection: Connection,
    /// Transport timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    #[serde(default = "default_temperature_poll_ms")]
    pub poll_interval_ms: u64,
    /// One entry per input, in input order
    #[serde(default = "default_lakeshore_channels")]
    pub channels: Vec<ChannelBinding>,
}

/// TR-71W configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tr71wConfig {
    /// Thermometer host
    pub host: String,
    /// HTTP port
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Logger number, used in default topic names
    #[serde(default = "default_ondotori_no")]
    pub ondotori_no: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    #[serde(default = "default_temperature_poll_ms")]
    pub poll_interval_ms: u64,
    /// Topic prefix; defaults to `tr71w{ondotori_no}`
    #[serde(default)]
    pub prefix: Option<String>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_temperature_poll_ms() -> u64 {
    1000
}

fn default_http_port() -> u16 {
    80
}

fn default_ondotori_no() -> String {
    "1".to_string()
}

fn default_lakeshore_channels() -> Vec<ChannelBinding> {
    (1..=crate::driver::lakeshore218::CHANNELS)
        .map(|ch| ChannelBinding::enabled(format!("lakeshore218_ch{}", ch)))
        .collect()
}

// ============================================================================
// Resolved views
// ============================================================================

impl SignalGeneratorConfig {
    /// Transport endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.host, self.port, self.connection.into())
    }

    /// Transport timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Polling interval, if polling is enabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    /// Topic names after applying the prefix and overrides.
    pub fn topics(&self) -> SignalGeneratorTopics {
        let o = &self.topics;
        let prefix = o
            .prefix
            .clone()
            .unwrap_or_else(|| self.model.name().to_ascii_lowercase());
        let defaults = SignalGeneratorTopics::with_prefix(&prefix);
        let pick = |name: &Option<String>, default: String| name.clone().unwrap_or(default);
        SignalGeneratorTopics {
            freq: pick(&o.freq, defaults.freq),
            power: pick(&o.power, defaults.power),
            onoff: pick(&o.onoff, defaults.onoff),
            freq_cmd: pick(&o.freq_cmd, defaults.freq_cmd),
            power_cmd: pick(&o.power_cmd, defaults.power_cmd),
            onoff_cmd: pick(&o.onoff_cmd, defaults.onoff_cmd),
        }
    }
}

impl Lakeshore218Config {
    /// Transport endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.host, self.port, self.connection.into())
    }

    /// Transport timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Polling interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Tr71wConfig {
    /// HTTP endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.host, self.port, TransportKind::Http)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Polling interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Channel bindings: `{prefix}_temp_1` and `{prefix}_temp_2`, both enabled.
    pub fn channels(&self) -> Vec<ChannelBinding> {
        let prefix = self
            .prefix
            .clone()
            .unwrap_or_else(|| format!("tr71w{}", self.ondotori_no));
        (1..=crate::driver::tr71w::CHANNELS)
            .map(|ch| ChannelBinding::enabled(format!("{}_temp_{}", prefix, ch)))
            .collect()
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl BridgeConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, then validate it.
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] if the file cannot be read or has the wrong shape,
    /// [`BridgeError::Configuration`] if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Host is not empty; GPIB addresses are at most 30
    /// - Timeouts and polling intervals are positive (a zero settle delay is allowed)
    /// - Lake Shore has exactly 8 channel entries, enabled ones with a topic
    /// - Topic names are non-empty and distinct
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        match &self.instrument {
            InstrumentConfig::SignalGenerator(sg) => {
                validate_endpoint(&sg.host, sg.port, sg.connection)?;
                positive("timeout_ms", sg.timeout_ms)?;
                if let Some(interval) = sg.poll_interval_ms {
                    positive("poll_interval_ms", interval)?;
                }
                validate_topics(sg.topics().all())?;
            }
            InstrumentConfig::Lakeshore218(ls) => {
                validate_endpoint(&ls.host, ls.port, ls.connection)?;
                positive("timeout_ms", ls.timeout_ms)?;
                positive("poll_interval_ms", ls.poll_interval_ms)?;
                let expected = crate::driver::lakeshore218::CHANNELS;
                if ls.channels.len() != expected {
                    return Err(BridgeError::Configuration(format!(
                        "Lakeshore218 needs exactly {} channel entries, got {}",
                        expected,
                        ls.channels.len()
                    )));
                }
                validate_topics(
                    ls.channels
                        .iter()
                        .filter(|c| c.enabled)
                        .map(|c| c.topic.as_str()),
                )?;
            }
            InstrumentConfig::Tr71w(tr) => {
                if tr.host.trim().is_empty() {
                    return Err(BridgeError::Configuration("'host' cannot be empty".into()));
                }
                positive("timeout_ms", tr.timeout_ms)?;
                positive("poll_interval_ms", tr.poll_interval_ms)?;
                let channels = tr.channels();
                validate_topics(channels.iter().map(|c| c.topic.as_str()))?;
            }
        }

        Ok(())
    }

    /// Short instrument description for logs.
    pub fn describe(&self) -> String {
        match &self.instrument {
            InstrumentConfig::SignalGenerator(sg) => {
                format!("{} at {}", sg.model.name(), sg.endpoint())
            }
            InstrumentConfig::Lakeshore218(ls) => format!("Lakeshore218 at {}", ls.endpoint()),
            InstrumentConfig::Tr71w(tr) => format!("TR-71W at {}", tr.endpoint()),
        }
    }
}

fn validate_endpoint(host: &str, port: u16, connection: Connection) -> AppResult<()> {
    if host.trim().is_empty() {
        return Err(BridgeError::Configuration("'host' cannot be empty".into()));
    }
    match connection {
        Connection::Gpib if port > MAX_GPIB_ADDRESS => Err(BridgeError::Configuration(format!(
            "GPIB address {} is out of range (0-{})",
            port, MAX_GPIB_ADDRESS
        ))),
        Connection::Lan if port == 0 => {
            Err(BridgeError::Configuration("TCP port cannot be 0".into()))
        }
        _ => Ok(()),
    }
}

fn positive(field: &str, value: u64) -> AppResult<()> {
    if value == 0 {
        return Err(BridgeError::Configuration(format!(
            "'{}' must be > 0",
            field
        )));
    }
    Ok(())
}

fn validate_topics<'a>(topics: impl IntoIterator<Item = &'a str>) -> AppResult<()> {
    let mut seen = HashSet::new();
    for topic in topics {
        if topic.trim().is_empty() {
            return Err(BridgeError::Configuration("Topic names cannot be empty".into()));
        }
        if !seen.insert(topic) {
            return Err(BridgeError::Configuration(format!(
                "Duplicate topic name: '{}'",
                topic
            )));
        }
    }
    Ok(())
}
