//! One-way notifications to the service manager (sd_notify protocol).
//!
//! Every notification is fire-and-forget: the supervisor never returns data
//! the control loop depends on, and send failures are logged rather than
//! propagated so the loop is never blocked or unwound by observability.

use std::{
    env,
    os::linux::net::SocketAddrExt,
    os::unix::net::{SocketAddr, UnixDatagram},
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use log::warn;

/// Handle to the supervisor's notification socket.
///
/// Constructed from `$NOTIFY_SOCKET`; when the variable is absent every
/// notification is a silent no-op, which is the unsupervised case.
#[derive(Clone)]
pub struct Supervisor {
    socket: Option<Arc<UnixDatagram>>,
}

impl Supervisor {
    /// Connects to the socket named by `$NOTIFY_SOCKET`, if any.
    ///
    /// A present but unusable socket is degraded to the disconnected state
    /// with a warning; notification delivery is never a reason to refuse to
    /// control the fan.
    pub fn from_env() -> Self {
        let Ok(path) = env::var("NOTIFY_SOCKET") else {
            return Self::disconnected();
        };
        match connect(&path) {
            Ok(socket) => Self {
                socket: Some(Arc::new(socket)),
            },
            Err(e) => {
                warn!("Cannot connect to notify socket {path}: {e:#}");
                Self::disconnected()
            }
        }
    }

    /// Connects to an explicit socket path.
    pub fn connected_to(path: &Path) -> Result<Self> {
        let socket = UnixDatagram::unbound().context("create notify socket")?;
        socket
            .connect(path)
            .with_context(|| format!("connect notify socket {}", path.display()))?;
        Ok(Self {
            socket: Some(Arc::new(socket)),
        })
    }

    /// A supervisor that drops every notification.
    pub fn disconnected() -> Self {
        Self { socket: None }
    }

    pub fn ready(&self) {
        self.notify("READY=1");
    }

    pub fn reloading(&self) {
        self.notify("RELOADING=1");
    }

    pub fn stopping(&self) {
        self.notify("STOPPING=1");
    }

    pub fn watchdog(&self) {
        self.notify("WATCHDOG=1");
    }

    pub fn status(&self, text: &str) {
        self.notify(&format!("STATUS={text}"));
    }

    pub fn errno(&self, errno: i32) {
        self.notify(&format!("ERRNO={errno}"));
    }

    fn notify(&self, state: &str) {
        let Some(socket) = &self.socket else {
            return;
        };
        if let Err(e) = socket.send(state.as_bytes()) {
            warn!("Cannot notify supervisor: {e}");
        }
    }
}

fn connect(path: &str) -> Result<UnixDatagram> {
    let socket = UnixDatagram::unbound().context("create notify socket")?;
    // systemd may hand out an abstract-namespace socket, spelled with a
    // leading '@' in the environment.
    if let Some(name) = path.strip_prefix('@') {
        let addr = SocketAddr::from_abstract_name(name.as_bytes())
            .with_context(|| format!("abstract notify socket {path}"))?;
        socket
            .connect_addr(&addr)
            .with_context(|| format!("connect notify socket {path}"))?;
    } else {
        socket
            .connect(path)
            .with_context(|| format!("connect notify socket {path}"))?;
    }
    Ok(socket)
}

/// Watchdog ping period from `$WATCHDOG_USEC`, per the sd_notify push
/// convention: pings are sent at half the interval the supervisor expects.
///
/// Absent variable means no watchdog pings are ever sent. A malformed value
/// is a startup error, not something to guess around.
pub fn watchdog_interval() -> Result<Option<Duration>> {
    parse_watchdog_usec(env::var("WATCHDOG_USEC").ok().as_deref())
}

fn parse_watchdog_usec(raw: Option<&str>) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let usec: u64 = raw
        .parse()
        .with_context(|| format!("invalid WATCHDOG_USEC '{raw}'"))?;
    if usec == 0 {
        bail!("WATCHDOG_USEC must be positive");
    }
    Ok(Some(Duration::from_micros(usec) / 2))
}
