//! # raspifand
//!
//! A Linux daemon that keeps a cooling fan's on/off state synchronized with
//! a measured temperature, using two-threshold hysteresis to avoid rapid
//! switching.
//!
//! ## Features
//!
//! - **Hysteresis Control**: Schmitt-trigger decision function with separate
//!   on/off thresholds
//! - **Hardware Is Truth**: fan level is re-read from the GPIO pin before
//!   every decision, never cached
//! - **Supervisable**: sd_notify readiness, watchdog pings, status text and
//!   reload/stop signal handling
//! - **Hot Reload**: configuration changes on SIGHUP without restart
//!
//! ## Architecture
//!
//! The daemon is a single-threaded event dispatcher:
//! - [`ControlLoop`](control::ControlLoop) - owns state, timers and the pin;
//!   the only component with ordering concerns
//! - [`Supervisor`](supervisor::Supervisor) - one-way notifications to the
//!   service manager
//! - [`SysfsPin`](gpio::SysfsPin) / [`ThermalZoneSensor`](sensors::ThermalZoneSensor) -
//!   stateless sysfs I/O shims
//!
//! ## Example
//!
//! ```no_run
//! use raspifand::{application::Application, supervisor::Supervisor};
//!
//! fn main() -> anyhow::Result<()> {
//!     let app = Application::builder()
//!         .with_supervisor(Supervisor::from_env())
//!         .build()?;
//!     tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()?
//!         .block_on(app.run())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod control;
pub mod gpio;
pub mod install;
pub mod sensors;
pub mod supervisor;
