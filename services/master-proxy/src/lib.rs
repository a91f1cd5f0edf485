//! Failover TCP proxy for a replicated key-value cluster.
//!
//! For every configured port the proxy keeps asking the candidate nodes who
//! the master is (`info replication`) and forwards new client connections to
//! the first node that answers `role:master`.
//!
//! ## Architecture
//!
//! ```text
//!                 +-----------+   probe   +--------------+
//!                 |  Elector  | --------> | cluster nodes|
//!                 +-----------+           +--------------+
//!                       | publish                ^
//!                       v                        |
//! Client -> Forwarder -> PortBinding (RwLock) -> session (2 copy tasks)
//! ```
//!
//! One [`PortSupervisor`] per port owns an [`Elector`] and a [`Forwarder`]
//! sharing one [`PortBinding`]. [`GlobalStats`] is shared process-wide.

pub mod config;
pub mod elector;
pub mod error;
pub mod forwarder;
pub mod notify;
pub mod probe;
pub mod stats;
pub mod supervisor;

pub use config::{Args, Config};
pub use elector::{
    attempt_timeout, Elector, ElectorConfig, ElectorState, MasterChange, PortBinding,
};
pub use error::{ConfigError, ProbeError};
pub use forwarder::{Forwarder, ForwarderConfig};
pub use notify::{LogNotifier, NoopNotifier, Notifier, SystemdNotifier};
pub use probe::{classify_reply, probe_node, ProbeOutcome, Reply};
pub use stats::{GlobalStats, RateSampler, StatusReport};
pub use supervisor::{ClusterSettings, PortSupervisor};
