//! Application startup wiring and builder pattern implementation.

use anyhow::{Context, Result};
use log::info;

use crate::{
    config::{self, Config},
    control::{ControlLoop, PinOpener},
    gpio::{FanPin, SysfsPin},
    sensors::ThermalZoneSensor,
    supervisor::{self, Supervisor},
};
use std::path::PathBuf;

/// The assembled daemon: configuration loaded, hardware opened, supervisor
/// attached. Startup failures surface from [`ApplicationBuilder::build`];
/// this type only runs the control loop.
pub struct Application {
    control: ControlLoop,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the control loop until a termination signal.
    pub async fn run(self) -> Result<()> {
        self.control.run().await
    }
}

/// Builder performing the fallible startup sequence.
///
/// Order matters: configuration and the watchdog setting are validated
/// before any hardware is touched, so a misconfigured unit never exports a
/// GPIO pin.
pub struct ApplicationBuilder {
    config_path: Option<PathBuf>,
    supervisor: Option<Supervisor>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_path: None,
            supervisor: None,
        }
    }

    /// Overrides the configuration file location (CLI flag).
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Attaches an already-connected supervisor channel.
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Loads configuration, parses the watchdog setting and opens the fan
    /// pin. Every failure here is fatal for the daemon.
    pub fn build(self) -> Result<Application> {
        let supervisor = self.supervisor.unwrap_or_else(Supervisor::from_env);

        let config_path = config::locate_config(self.config_path);
        let config = Config::load(&config_path).context("load configuration")?;

        let watchdog = supervisor::watchdog_interval().context("read watchdog settings")?;
        if let Some(period) = watchdog {
            info!("Will send watchdog notifications every {period:?}");
        }

        let pin = open_fan_pin(config.pin).context("open fan output pin")?;
        match pin.read() {
            Ok(level) => info!("Fan is {level}"),
            Err(e) => info!("Fan level not readable yet: {e:#}"),
        }

        let opener: PinOpener = Box::new(open_fan_pin);
        let control = ControlLoop::new(
            config,
            config_path,
            pin,
            opener,
            Box::new(ThermalZoneSensor::new()),
            supervisor,
            watchdog,
        );

        Ok(Application { control })
    }
}

fn open_fan_pin(number: u64) -> Result<Box<dyn FanPin>> {
    SysfsPin::open(number).map(|pin| Box::new(pin) as Box<dyn FanPin>)
}
