//! Hysteresis control loop and event dispatcher.
//!
//! This is the only stateful part of the daemon. A single cooperative loop
//! owns the configuration, the output pin and the timers, blocks on one
//! multi-way wait for the next event, and processes it to completion before
//! waiting again. Because every mutation happens inside that loop, no
//! synchronization primitives are needed anywhere in the core.

use std::{future, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};

use crate::{
    config::Config,
    gpio::{FanLevel, FanPin},
    sensors::TemperatureSensor,
    supervisor::Supervisor,
};

/// Opens an output pin by number.
///
/// Injected so a reload can rebind the hardware without the loop knowing the
/// concrete pin type.
pub type PinOpener = Box<dyn Fn(u64) -> Result<Box<dyn FanPin>> + Send>;

/// One occurrence the dispatcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    PollTick,
    WatchdogTick,
    ReloadSignal,
    TerminateSignal,
}

/// Two-threshold (Schmitt trigger) decision function.
///
/// Turns the fan on at or above `max` and off at or below `target`; anywhere
/// in between the current level stands, which is what prevents oscillation
/// when the temperature hovers near a single boundary. First match wins, the
/// on-branch first, so the result is deterministic even under an inverted
/// band (`target > max`).
pub fn decide(temp: f64, level: FanLevel, max: f64, target: f64) -> FanLevel {
    if temp >= max && level == FanLevel::Off {
        FanLevel::On
    } else if temp <= target && level == FanLevel::On {
        FanLevel::Off
    } else {
        level
    }
}

/// What the dispatch loop has to act on after a reload.
#[derive(Debug, Default, PartialEq)]
struct ReloadOutcome {
    /// Set when the polling interval changed; the poll timer is re-armed
    /// with this period, counting from the moment of reset.
    new_interval: Option<Duration>,
}

/// The control loop: owns the live configuration and the fan pin, and runs
/// the event-dispatch cycle until a termination signal.
pub struct ControlLoop {
    config: Config,
    config_path: PathBuf,
    pin: Box<dyn FanPin>,
    open_pin: PinOpener,
    sensor: Box<dyn TemperatureSensor>,
    supervisor: Supervisor,
    watchdog: Option<Duration>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        config_path: PathBuf,
        pin: Box<dyn FanPin>,
        open_pin: PinOpener,
        sensor: Box<dyn TemperatureSensor>,
        supervisor: Supervisor,
        watchdog: Option<Duration>,
    ) -> Self {
        Self {
            config,
            config_path,
            pin,
            open_pin,
            sensor,
            supervisor,
            watchdog,
        }
    }

    /// Runs the dispatch cycle until a termination signal.
    ///
    /// Announces readiness, performs one immediate decision cycle with the
    /// just-loaded thresholds, then blocks on the multi-way wait. Exactly one
    /// event is handled per iteration; no handler outlives its iteration.
    pub async fn run(mut self) -> Result<()> {
        let mut sighup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;

        let mut poll = arm_timer(self.config.polling_interval);
        let mut watchdog = self.watchdog.map(arm_timer);

        self.supervisor.ready();
        self.check_temperature().await;

        loop {
            let event = tokio::select! {
                _ = poll.tick() => Event::PollTick,
                _ = tick_optional(&mut watchdog) => Event::WatchdogTick,
                _ = sighup.recv() => Event::ReloadSignal,
                _ = sigterm.recv() => Event::TerminateSignal,
                _ = sigint.recv() => Event::TerminateSignal,
            };

            match event {
                Event::PollTick => self.check_temperature().await,
                Event::WatchdogTick => self.supervisor.watchdog(),
                Event::ReloadSignal => {
                    let outcome = self.handle_reload().await;
                    if let Some(period) = outcome.new_interval {
                        poll = arm_timer(period);
                    }
                }
                Event::TerminateSignal => {
                    info!("Termination signal received, stopping");
                    self.supervisor.stopping();
                    break;
                }
            }
        }

        Ok(())
    }

    /// One decision cycle: sample, re-read the pin, decide, maybe switch.
    ///
    /// A sampling failure is transient: it is reported and the cycle is
    /// skipped, leaving the next scheduled tick to try again.
    async fn check_temperature(&mut self) {
        let temp = match self.sensor.read_temperature().await {
            Ok(temp) => temp,
            Err(e) => {
                warn!("Temperature probe failed: {e:#}");
                self.supervisor.status("cannot probe");
                return;
            }
        };

        // Hardware is truth: never decide from a cached level.
        let level = match self.pin.read() {
            Ok(level) => level,
            Err(e) => {
                warn!("Cannot read fan pin: {e:#}");
                return;
            }
        };
        info!("Polled: temperature={temp:.2} fan={level}");

        let next = decide(
            temp,
            level,
            self.config.maximum_temperature,
            self.config.target_temperature,
        );
        if next == level {
            return;
        }

        match self.pin.write(next) {
            Ok(()) => {
                let status = match next {
                    FanLevel::On => "fan on",
                    FanLevel::Off => "fan off",
                };
                info!("Switched fan {next}");
                self.supervisor.status(status);
            }
            Err(e) => warn!("Cannot switch fan pin: {e:#}"),
        }
    }

    /// Reload-signal handler.
    ///
    /// On decode failure the previous configuration stays authoritative and
    /// the failure is reported as status text. Readiness is re-announced
    /// unconditionally, whether or not anything changed.
    async fn handle_reload(&mut self) -> ReloadOutcome {
        self.supervisor.reloading();

        let outcome = match Config::load(&self.config_path) {
            Ok(new_config) => self.apply_config(new_config).await,
            Err(e) => {
                warn!("Reload failed: {e:#}");
                self.supervisor.status(&format!("{e:#}"));
                ReloadOutcome::default()
            }
        };

        self.supervisor.ready();
        outcome
    }

    async fn apply_config(&mut self, new_config: Config) -> ReloadOutcome {
        if new_config.pin != self.config.pin {
            match (self.open_pin)(new_config.pin) {
                Ok(pin) => {
                    info!("Rebound fan output to pin {}", new_config.pin);
                    self.pin = pin;
                }
                Err(e) => {
                    // The old pin and the rest of the previous config stay
                    // active; half-applied configs are worse than stale ones.
                    warn!("Cannot open pin {}: {e:#}", new_config.pin);
                    self.supervisor
                        .status(&format!("cannot open pin {}", new_config.pin));
                    return ReloadOutcome::default();
                }
            }
        }

        let new_interval = (new_config.polling_interval != self.config.polling_interval)
            .then_some(new_config.polling_interval);
        let thresholds_changed = new_config.maximum_temperature != self.config.maximum_temperature
            || new_config.target_temperature != self.config.target_temperature;

        self.config = new_config;

        if thresholds_changed {
            // New thresholds take effect now, not at the next poll tick.
            self.check_temperature().await;
        }

        ReloadOutcome { new_interval }
    }
}

/// Recurring timer whose first tick fires one full period from now.
fn arm_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Ticks the watchdog timer, or never resolves when none is configured.
///
/// Modeling absence as a never-ready event source keeps the dispatch free of
/// special cases.
async fn tick_optional(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(interval) => interval.tick().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockFanPin;
    use crate::sensors::MockTemperatureSensor;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::{
        path::Path,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tempfile::NamedTempFile;

    const MAX: f64 = 80.0;
    const TARGET: f64 = 60.0;

    #[test]
    fn turns_on_at_maximum_with_defaults() {
        // Scenario: defaults, fan off, temp 85.
        assert_eq!(decide(85.0, FanLevel::Off, MAX, TARGET), FanLevel::On);
    }

    #[test]
    fn stays_on_inside_the_band() {
        assert_eq!(decide(65.0, FanLevel::On, MAX, TARGET), FanLevel::On);
    }

    #[test]
    fn turns_off_at_target() {
        assert_eq!(decide(55.0, FanLevel::On, MAX, TARGET), FanLevel::Off);
    }

    #[test]
    fn stays_off_inside_the_band() {
        assert_eq!(decide(75.0, FanLevel::Off, MAX, TARGET), FanLevel::Off);
    }

    #[test]
    fn boundary_values_trigger_transitions() {
        assert_eq!(decide(MAX, FanLevel::Off, MAX, TARGET), FanLevel::On);
        assert_eq!(decide(TARGET, FanLevel::On, MAX, TARGET), FanLevel::Off);
    }

    #[test]
    fn inverted_band_applies_on_branch_first() {
        // target > max: both conditions can hold, the on-branch wins.
        assert_eq!(decide(70.0, FanLevel::Off, 60.0, 80.0), FanLevel::On);
        assert_eq!(decide(70.0, FanLevel::On, 60.0, 80.0), FanLevel::Off);
    }

    #[test]
    fn band_interior_sequence_never_toggles() {
        let mut level = FanLevel::On;
        for temp in [61.0, 75.0, 79.9, 60.1, 70.0] {
            let next = decide(temp, level, MAX, TARGET);
            assert_eq!(next, level);
            level = next;
        }
    }

    proptest! {
        #[test]
        fn decide_is_idempotent(
            temp in -50.0f64..150.0,
            target in 0.0f64..100.0,
            width in 0.0f64..50.0,
        ) {
            let max = target + width;
            for level in [FanLevel::On, FanLevel::Off] {
                let once = decide(temp, level, max, target);
                let twice = decide(temp, once, max, target);
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn once_on_stays_on_above_target(
            target in 0.0f64..100.0,
            width in 0.1f64..50.0,
            above in 0.001f64..100.0,
        ) {
            let max = target + width;
            let temp = target + above;
            prop_assert_eq!(decide(temp, FanLevel::On, max, target), FanLevel::On);
        }

        #[test]
        fn once_off_stays_off_below_max(
            target in 0.0f64..100.0,
            width in 0.1f64..50.0,
            below in 0.001f64..100.0,
        ) {
            let max = target + width;
            let temp = max - below;
            prop_assert_eq!(decide(temp, FanLevel::Off, max, target), FanLevel::Off);
        }

        #[test]
        fn strict_band_interior_is_stable(
            target in 0.0f64..100.0,
            width in 0.1f64..50.0,
            fractions in prop::collection::vec(0.0001f64..0.9999, 1..20),
        ) {
            let max = target + width;
            for level in [FanLevel::On, FanLevel::Off] {
                let mut current = level;
                for f in &fractions {
                    current = decide(target + f * width, current, max, target);
                }
                prop_assert_eq!(current, level);
            }
        }
    }

    fn failing_opener() -> PinOpener {
        Box::new(|number| -> Result<Box<dyn FanPin>> {
            anyhow::bail!("no pin {number} in this test")
        })
    }

    fn control_loop(
        config: Config,
        config_path: &Path,
        pin: MockFanPin,
        sensor: MockTemperatureSensor,
        opener: PinOpener,
    ) -> ControlLoop {
        ControlLoop::new(
            config,
            config_path.to_path_buf(),
            Box::new(pin),
            opener,
            Box::new(sensor),
            Supervisor::disconnected(),
            None,
        )
    }

    fn write_config(file: &NamedTempFile, content: &str) {
        std::fs::write(file.path(), content).unwrap();
    }

    #[tokio::test]
    async fn sensor_failure_skips_cycle_without_pin_access() {
        let mut sensor = MockTemperatureSensor::new();
        sensor
            .expect_read_temperature()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("probe error")));

        let mut pin = MockFanPin::new();
        pin.expect_read().never();
        pin.expect_write().never();

        let file = NamedTempFile::new().unwrap();
        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        ctl.check_temperature().await;
    }

    #[tokio::test]
    async fn hot_sample_switches_fan_on() {
        let mut sensor = MockTemperatureSensor::new();
        sensor
            .expect_read_temperature()
            .times(1)
            .returning(|| Ok(85.0));

        let mut pin = MockFanPin::new();
        pin.expect_read().times(1).returning(|| Ok(FanLevel::Off));
        pin.expect_write()
            .with(eq(FanLevel::On))
            .times(1)
            .returning(|_| Ok(()));

        let file = NamedTempFile::new().unwrap();
        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        ctl.check_temperature().await;
    }

    #[tokio::test]
    async fn sample_inside_band_writes_nothing() {
        let mut sensor = MockTemperatureSensor::new();
        sensor
            .expect_read_temperature()
            .times(1)
            .returning(|| Ok(70.0));

        let mut pin = MockFanPin::new();
        pin.expect_read().times(1).returning(|| Ok(FanLevel::On));
        pin.expect_write().never();

        let file = NamedTempFile::new().unwrap();
        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        ctl.check_temperature().await;
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_config() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, "MaximumTemperature: [broken\n");

        let mut pin = MockFanPin::new();
        pin.expect_read().never();
        pin.expect_write().never();
        let mut sensor = MockTemperatureSensor::new();
        sensor.expect_read_temperature().never();

        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        let outcome = ctl.handle_reload().await;

        assert_eq!(outcome, ReloadOutcome::default());
        assert_eq!(ctl.config, Config::default());
    }

    #[tokio::test]
    async fn unchanged_reload_forces_nothing() {
        let file = NamedTempFile::new().unwrap();
        write_config(
            &file,
            "MaximumTemperature: 80.0\nTargetTemperature: 60.0\nPollingInterval: \"2m\"\nPin: 14\n",
        );

        let mut pin = MockFanPin::new();
        pin.expect_read().never();
        pin.expect_write().never();
        let mut sensor = MockTemperatureSensor::new();
        sensor.expect_read_temperature().never();

        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        let outcome = ctl.handle_reload().await;

        assert_eq!(outcome.new_interval, None);
    }

    #[tokio::test]
    async fn threshold_change_forces_exactly_one_cycle() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, "MaximumTemperature: 70.0\n");

        let mut sensor = MockTemperatureSensor::new();
        sensor
            .expect_read_temperature()
            .times(1)
            .returning(|| Ok(50.0));
        let mut pin = MockFanPin::new();
        pin.expect_read().times(1).returning(|| Ok(FanLevel::Off));
        pin.expect_write().never();

        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        let outcome = ctl.handle_reload().await;

        assert_eq!(outcome.new_interval, None);
        assert_eq!(ctl.config.maximum_temperature, 70.0);
    }

    #[tokio::test]
    async fn interval_change_requests_timer_reset() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, "PollingInterval: \"30s\"\n");

        let mut pin = MockFanPin::new();
        pin.expect_read().never();
        pin.expect_write().never();
        let mut sensor = MockTemperatureSensor::new();
        sensor.expect_read_temperature().never();

        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        let outcome = ctl.handle_reload().await;

        assert_eq!(outcome.new_interval, Some(Duration::from_secs(30)));
        assert_eq!(ctl.config.polling_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn pin_change_rebinds_and_later_writes_hit_new_pin() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, "Pin: 18\n");

        // Old pin must see no traffic once replaced.
        let mut old_pin = MockFanPin::new();
        old_pin.expect_read().never();
        old_pin.expect_write().never();

        let opened = Arc::new(Mutex::new(Vec::new()));
        let new_pin_writes = Arc::new(AtomicUsize::new(0));
        let opener: PinOpener = {
            let opened = opened.clone();
            let writes = new_pin_writes.clone();
            Box::new(move |number| {
                opened.lock().unwrap().push(number);
                let mut pin = MockFanPin::new();
                pin.expect_read().returning(|| Ok(FanLevel::Off));
                let writes = writes.clone();
                pin.expect_write().returning(move |_| {
                    writes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(Box::new(pin) as Box<dyn FanPin>)
            })
        };

        let mut sensor = MockTemperatureSensor::new();
        sensor.expect_read_temperature().returning(|| Ok(85.0));

        let mut ctl = control_loop(Config::default(), file.path(), old_pin, sensor, opener);
        let outcome = ctl.handle_reload().await;

        assert_eq!(outcome.new_interval, None);
        assert_eq!(*opened.lock().unwrap(), vec![18]);
        assert_eq!(ctl.config.pin, 18);

        // A hot poll now drives the freshly bound pin.
        ctl.check_temperature().await;
        assert_eq!(new_pin_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_pin_rebind_keeps_previous_config() {
        let file = NamedTempFile::new().unwrap();
        write_config(&file, "Pin: 18\nMaximumTemperature: 70.0\n");

        let mut pin = MockFanPin::new();
        pin.expect_read().never();
        pin.expect_write().never();
        let mut sensor = MockTemperatureSensor::new();
        sensor.expect_read_temperature().never();

        let mut ctl = control_loop(
            Config::default(),
            file.path(),
            pin,
            sensor,
            failing_opener(),
        );
        let outcome = ctl.handle_reload().await;

        assert_eq!(outcome, ReloadOutcome::default());
        assert_eq!(ctl.config, Config::default());
    }
}
