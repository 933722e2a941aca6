//! Temperature sources for the control loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;

/// Kernel thermal zone for the SoC temperature.
pub const THERMAL_ZONE_PATH: &str = "/sys/devices/virtual/thermal/thermal_zone0/temp";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Instantaneous temperature in degrees Celsius.
    async fn read_temperature(&self) -> Result<f64>;
}

/// Sensor backed by a sysfs thermal zone file.
///
/// The file holds a single integer line in millidegrees Celsius.
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new() -> Self {
        Self::at(THERMAL_ZONE_PATH)
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ThermalZoneSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemperatureSensor for ThermalZoneSensor {
    async fn read_temperature(&self) -> Result<f64> {
        let raw = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read temperature from {}", self.path.display()))?;
        let millidegrees: i64 = raw
            .trim()
            .parse()
            .with_context(|| format!("parse temperature value '{}'", raw.trim()))?;
        Ok(millidegrees as f64 / 1000.0)
    }
}
