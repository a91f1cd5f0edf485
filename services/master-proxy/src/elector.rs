//! Per-port master election.
//!
//! Each listening port owns a [`PortBinding`], the published "current master"
//! for that port, and an [`Elector`] that keeps it up to date:
//!
//! - Every poll, up to [`MAX_ATTEMPTS`] election cycles run in sequence.
//! - A cycle probes the candidates in configured order; the first node that
//!   reports `role:master` wins and the rest of the cycle is skipped.
//! - Each attempt uses a longer probe timeout than the previous one.
//! - If no attempt finds a master, the binding is cleared (Searching) and the
//!   forwarder refuses new connections until a master shows up again.
//!
//! The published address is only ever one that most recently passed the
//! probe; it is never synthesized.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::probe::{probe_node, ProbeOutcome};

/// Election cycles per determination before declaring "no master".
pub const MAX_ATTEMPTS: u32 = 3;

/// Default base probe timeout (first attempt).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default pause between determinations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Probe timeout for the given 1-based attempt number.
///
/// Attempt 1 uses `base`, attempt `n` uses `base * n`.
pub fn attempt_timeout(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

/// Whether two addresses name the same endpoint (IP bytes and port).
fn same_endpoint(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.ip() == b.ip() && a.port() == b.port()
}

/// Result of publishing a determination to a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterChange {
    /// Same master as before (or still none).
    Unchanged,
    /// A new master was locked (previous one, if any, in `from`).
    Changed {
        from: Option<SocketAddr>,
        to: SocketAddr,
    },
    /// The previous master is gone; now searching.
    Lost { from: SocketAddr },
}

/// Elector state for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    /// No known master.
    Searching,
    /// Traffic goes to this master.
    Locked(SocketAddr),
}

/// The mutable "current master" record of one listening port.
#[derive(Debug)]
pub struct PortBinding {
    port: u16,
    master: RwLock<Option<SocketAddr>>,
}

impl PortBinding {
    /// Create a binding with no known master.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            master: RwLock::new(None),
        }
    }

    /// Port this binding serves (and probes on).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Snapshot of the current master under a shared lock.
    pub async fn current(&self) -> Option<SocketAddr> {
        *self.master.read().await
    }

    /// Current elector state.
    pub async fn state(&self) -> ElectorState {
        match self.current().await {
            Some(addr) => ElectorState::Locked(addr),
            None => ElectorState::Searching,
        }
    }

    /// Overwrite the master under the exclusive lock and report what changed.
    pub async fn publish(&self, new: Option<SocketAddr>) -> MasterChange {
        let mut master = self.master.write().await;
        let previous = *master;
        *master = new;

        match (previous, new) {
            (Some(from), Some(to)) if same_endpoint(&from, &to) => MasterChange::Unchanged,
            (from, Some(to)) => MasterChange::Changed { from, to },
            (Some(from), None) => MasterChange::Lost { from },
            (None, None) => MasterChange::Unchanged,
        }
    }
}

/// Elector tunables.
#[derive(Debug, Clone)]
pub struct ElectorConfig {
    /// Probe timeout of the first attempt.
    pub base_timeout: Duration,
    /// Pause between determinations.
    pub poll_interval: Duration,
    /// Election cycles per determination.
    pub max_attempts: u32,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            base_timeout: DEFAULT_PROBE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// Follows the master for one port.
pub struct Elector {
    nodes: Arc<[String]>,
    auth: Option<Arc<str>>,
    binding: Arc<PortBinding>,
    config: ElectorConfig,
}

impl Elector {
    /// Create an elector that probes `nodes` on the binding's port.
    pub fn new(
        nodes: Arc<[String]>,
        auth: Option<Arc<str>>,
        binding: Arc<PortBinding>,
        config: ElectorConfig,
    ) -> Self {
        Self {
            nodes,
            auth,
            binding,
            config,
        }
    }

    /// The binding this elector publishes to.
    pub fn binding(&self) -> &Arc<PortBinding> {
        &self.binding
    }

    /// Follow the master forever.
    pub async fn run(self) {
        let port = self.binding.port();
        info!(
            port,
            nodes = self.nodes.len(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Following master"
        );

        loop {
            self.poll_once().await;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One full determination published to the binding.
    pub async fn poll_once(&self) -> MasterChange {
        let port = self.binding.port();
        let found = self.determine_master().await;
        let change = self.binding.publish(found).await;

        match change {
            MasterChange::Changed { from, to } => {
                info!(
                    port,
                    master = %to,
                    previous = ?from,
                    "Changing master"
                );
            }
            MasterChange::Lost { from } => {
                warn!(
                    port,
                    previous = %from,
                    "Master lost, not serving new connections until a master is found"
                );
            }
            MasterChange::Unchanged => {
                if found.is_none() {
                    warn!(
                        port,
                        "No masters found, not serving new connections until a master is found"
                    );
                }
            }
        }

        change
    }

    /// Run up to `max_attempts` cycles with escalating timeouts.
    pub async fn determine_master(&self) -> Option<SocketAddr> {
        for attempt in 1..=self.config.max_attempts.max(1) {
            let probe_timeout = attempt_timeout(self.config.base_timeout, attempt);
            if let Some(addr) = self.run_cycle(probe_timeout).await {
                return Some(addr);
            }
            debug!(
                port = self.binding.port(),
                attempt,
                timeout_ms = probe_timeout.as_millis() as u64,
                "Election cycle found no master"
            );
        }
        None
    }

    /// Probe candidates in order; first master wins.
    async fn run_cycle(&self, probe_timeout: Duration) -> Option<SocketAddr> {
        let port = self.binding.port();

        for node in self.nodes.iter() {
            match probe_node(node, port, self.auth.as_deref(), probe_timeout).await {
                Ok(ProbeOutcome::Master(addr)) => return Some(addr),
                Ok(ProbeOutcome::AuthRejected) => {
                    warn!(node = %node, port, "NOAUTH Authentication required, check the configured credential");
                }
                Ok(ProbeOutcome::NotMaster) => {
                    debug!(node = %node, port, "Node is not master");
                }
                Err(e) if e.is_connect() => {
                    warn!(node = %node, port, error = %e, "Can't connect to node");
                }
                Err(e) => {
                    warn!(node = %node, port, error = %e, "Probe read failed");
                }
            }
        }

        None
    }
}
