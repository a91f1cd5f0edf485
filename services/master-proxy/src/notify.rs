//! Readiness and status notification to a process supervisor.
//!
//! Notifications are best-effort: failures are logged and never abort the
//! process. The core only sees the [`Notifier`] trait, so tests run with
//! [`NoopNotifier`].

use std::sync::Arc;

use sd_notify::NotifyState;
use tracing::{info, warn};

/// Environment variable set by systemd for `Type=notify` services.
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Sink for readiness and status updates.
pub trait Notifier: Send + Sync {
    /// All listening ports are bound.
    fn ready(&self);

    /// Periodic human-readable status line.
    fn status(&self, status: &str);
}

/// Sends `READY=1` / `STATUS=...` over the systemd notify socket.
#[derive(Debug, Default)]
pub struct SystemdNotifier;

impl Notifier for SystemdNotifier {
    fn ready(&self) {
        if let Err(e) = sd_notify::notify(false, &[NotifyState::Ready]) {
            warn!(error = %e, "Failed to notify ready to systemd");
        }
    }

    fn status(&self, status: &str) {
        if let Err(e) = sd_notify::notify(false, &[NotifyState::Status(status)]) {
            warn!(error = %e, "Failed to push status to systemd");
        }
    }
}

/// Logs status lines instead of pushing them anywhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn ready(&self) {
        info!("All listeners bound, ready");
    }

    fn status(&self, status: &str) {
        info!("{}", status);
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn ready(&self) {}

    fn status(&self, _status: &str) {}
}

/// Whether a notify-capable supervisor launched this process.
pub fn supervisor_present() -> bool {
    std::env::var_os(NOTIFY_SOCKET_ENV).is_some_and(|v| !v.is_empty())
}

/// Pick the notifier for the current environment.
pub fn from_env() -> Arc<dyn Notifier> {
    if supervisor_present() {
        Arc::new(SystemdNotifier)
    } else {
        Arc::new(LogNotifier)
    }
}
