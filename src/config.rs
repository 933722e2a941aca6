//! Configuration management for the raspifand daemon.
//!
//! Handles loading and validation of the YAML configuration file that
//! defines the hysteresis thresholds, polling interval and output pin.

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::Deserialize;
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/raspifand/config.yml";

/// Daemon configuration, immutable once produced for a control cycle.
///
/// Deserialized from the YAML configuration file. A missing file yields the
/// built-in defaults; a missing field yields that field's default, so partial
/// documents are valid.
///
/// # Example
///
/// ```yaml
/// MaximumTemperature: 80.0
/// TargetTemperature: 60.0
/// PollingInterval: "2m"
/// Pin: 14
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Threshold at or above which the fan must be on, in degrees Celsius.
    #[serde(default = "defaults::maximum_temperature")]
    pub maximum_temperature: f64,

    /// Threshold at or below which the fan must be off, in degrees Celsius.
    #[serde(default = "defaults::target_temperature")]
    pub target_temperature: f64,

    /// How often to re-sample the temperature. Duration string, e.g. "90s", "2m".
    #[serde(
        default = "defaults::polling_interval",
        deserialize_with = "duration_string::deserialize"
    )]
    pub polling_interval: Duration,

    /// GPIO pin number driving the fan.
    #[serde(default = "defaults::pin")]
    pub pin: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maximum_temperature: defaults::maximum_temperature(),
            target_temperature: defaults::target_temperature(),
            polling_interval: defaults::polling_interval(),
            pin: defaults::pin(),
        }
    }
}

impl Config {
    /// Loads configuration from the given path.
    ///
    /// A missing file is not an error: the built-in defaults apply. Any other
    /// read, decode or validation failure is reported to the caller, which on
    /// reload keeps the previously active configuration authoritative.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.log_summary("No config file; using defaults");
                return Ok(config);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read config file {}", path.display()));
            }
        };

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("parse YAML in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("validate config from {}", path.display()))?;
        config.log_summary("Loaded config");
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// An inverted hysteresis band (`target > max`) is flagged with a warning
    /// but accepted: the decision function stays deterministic under it, so
    /// the daemon keeps running on a config the operator may have intended.
    pub fn validate(&self) -> Result<()> {
        if self.polling_interval.is_zero() {
            bail!("PollingInterval must be positive");
        }
        if self.hysteresis_band_inverted() {
            warn!(
                "TargetTemperature {} exceeds MaximumTemperature {}; hysteresis band is inverted",
                self.target_temperature, self.maximum_temperature
            );
        }
        Ok(())
    }

    /// True when `target > max`, i.e. the two thresholds are swapped.
    pub fn hysteresis_band_inverted(&self) -> bool {
        self.target_temperature > self.maximum_temperature
    }

    fn log_summary(&self, msg: &str) {
        info!(
            "{msg}: max={} target={} interval={:?} pin={}",
            self.maximum_temperature, self.target_temperature, self.polling_interval, self.pin
        );
    }
}

/// Resolves the configuration file path.
///
/// Order: explicit CLI path, then the `RASPIFAND_CONFIG` environment
/// variable, then the fixed system location. The resolved path is kept for
/// reloads even when the file does not exist yet.
pub fn locate_config(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }
    if let Ok(env_path) = env::var("RASPIFAND_CONFIG") {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Parses a duration string made of integer value/unit segments.
///
/// Accepted units: `ms`, `s`, `m`, `h`. Segments concatenate, so `"1h30m"`
/// is ninety minutes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let input = s.trim();
    if input.is_empty() {
        bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| anyhow::anyhow!("missing unit in duration '{input}'"))?;
        if digits_end == 0 {
            bail!("invalid duration '{input}'");
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .with_context(|| format!("invalid duration '{input}'"))?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map_or(rest.len(), |i| digits_end + i);
        total += match &rest[digits_end..unit_end] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            unit => bail!("unknown unit '{unit}' in duration '{input}'"),
        };
        rest = &rest[unit_end..];
    }
    Ok(total)
}

mod duration_string {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod defaults {
    use std::time::Duration;

    pub fn maximum_temperature() -> f64 {
        80.0
    }

    pub fn target_temperature() -> f64 {
        60.0
    }

    pub fn polling_interval() -> Duration {
        Duration::from_secs(120)
    }

    pub fn pin() -> u64 {
        14
    }
}
