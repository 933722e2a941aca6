//! One-shot systemd service installation.
//!
//! Separate entry path from the runtime control loop: renders the bundled
//! unit template with this binary's own path and the thermal zone path, and
//! writes it to the system unit directory.

use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use log::info;

use crate::sensors::THERMAL_ZONE_PATH;

/// Where the generated unit file lands.
pub const UNIT_PATH: &str = "/usr/local/lib/systemd/system/raspifand.service";

const UNIT_TEMPLATE: &str = "\
[Unit]
Description=Temperature controlled fan daemon
ConditionPathExists={temp_path}

[Service]
Type=notify
ExecStart={exec_path}
ExecReload=/bin/kill -HUP $MAINPID
WatchdogSec=30
Restart=on-failure

[Install]
WantedBy=multi-user.target
";

/// Substitutes the executable and sensor paths into the unit template.
pub fn render_unit(exec_path: &str, temp_path: &str) -> String {
    UNIT_TEMPLATE
        .replace("{exec_path}", exec_path)
        .replace("{temp_path}", temp_path)
}

/// Writes the unit file to the fixed system path.
pub fn install_service() -> Result<()> {
    write_unit(Path::new(UNIT_PATH))
}

/// Writes the rendered unit file to an explicit destination.
pub fn write_unit(destination: &Path) -> Result<()> {
    let exec = env::current_exe().context("resolve daemon executable path")?;
    let unit = render_unit(&exec.display().to_string(), THERMAL_ZONE_PATH);

    fs::write(destination, unit)
        .with_context(|| format!("write unit file {}", destination.display()))?;
    info!("Installed service unit at {}", destination.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn render_substitutes_both_paths() {
        let unit = render_unit("/usr/local/bin/raspifand", "/sys/fake/temp");

        assert!(unit.contains("ExecStart=/usr/local/bin/raspifand"));
        assert!(unit.contains("ConditionPathExists=/sys/fake/temp"));
        assert!(!unit.contains("{exec_path}"));
        assert!(!unit.contains("{temp_path}"));
    }

    #[test]
    fn rendered_unit_requests_notify_supervision() {
        let unit = render_unit("/bin/raspifand", THERMAL_ZONE_PATH);

        assert!(unit.contains("Type=notify"));
        assert!(unit.contains("WatchdogSec="));
        assert!(unit.contains("ExecReload=/bin/kill -HUP $MAINPID"));
    }

    #[test]
    fn write_unit_creates_the_file() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("raspifand.service");

        write_unit(&destination).unwrap();

        let written = fs::read_to_string(&destination).unwrap();
        assert!(written.contains("[Service]"));
        assert_eq!(written.matches("ExecStart=").count(), 1);
    }

    #[test]
    fn write_unit_fails_on_unwritable_destination() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("missing-dir").join("raspifand.service");

        assert!(write_unit(&destination).is_err());
    }
}
