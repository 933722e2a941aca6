//! Sysfs GPIO output driving the fan.
//!
//! The physical pin is the single source of truth for the fan level: the
//! control loop re-reads it before every decision instead of caching it, so
//! the controller can never drift from hardware reality.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};

/// Sysfs GPIO class directory.
pub const GPIO_ROOT: &str = "/sys/class/gpio";

/// Binary fan state, mirrored 1:1 with the pin's high/low level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanLevel {
    On,
    Off,
}

impl FanLevel {
    fn as_sysfs(self) -> &'static str {
        match self {
            Self::On => "1",
            Self::Off => "0",
        }
    }

    fn from_sysfs(raw: &str) -> Result<Self> {
        match raw.trim() {
            "1" => Ok(Self::On),
            "0" => Ok(Self::Off),
            other => bail!("unexpected GPIO value '{other}'"),
        }
    }
}

impl fmt::Display for FanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// A single digital output pin the fan is wired to.
#[cfg_attr(test, mockall::automock)]
pub trait FanPin: Send {
    /// Current pin level read back from hardware.
    fn read(&self) -> Result<FanLevel>;

    /// Drives the pin high or low.
    fn write(&mut self, level: FanLevel) -> Result<()>;
}

/// GPIO pin exposed through the kernel sysfs interface.
///
/// Opening exports the pin if needed and configures it as an output. The pin
/// is deliberately never unexported: a pin replaced on reload keeps its
/// last-written level instead of being reset by the kernel.
pub struct SysfsPin {
    number: u64,
    value_path: PathBuf,
}

impl SysfsPin {
    pub fn open(number: u64) -> Result<Self> {
        Self::open_at(Path::new(GPIO_ROOT), number)
    }

    /// Opens a pin under an alternate sysfs root.
    pub fn open_at(root: &Path, number: u64) -> Result<Self> {
        let pin_dir = root.join(format!("gpio{number}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), number.to_string())
                .with_context(|| format!("export GPIO pin {number}"))?;
        }
        if !pin_dir.exists() {
            bail!("GPIO pin {number} did not appear after export");
        }
        fs::write(pin_dir.join("direction"), "out")
            .with_context(|| format!("configure GPIO pin {number} as output"))?;

        Ok(Self {
            number,
            value_path: pin_dir.join("value"),
        })
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl FanPin for SysfsPin {
    fn read(&self) -> Result<FanLevel> {
        let raw = fs::read_to_string(&self.value_path)
            .with_context(|| format!("read GPIO pin {}", self.number))?;
        FanLevel::from_sysfs(&raw)
    }

    fn write(&mut self, level: FanLevel) -> Result<()> {
        fs::write(&self.value_path, level.as_sysfs())
            .with_context(|| format!("drive GPIO pin {}", self.number))
    }
}
