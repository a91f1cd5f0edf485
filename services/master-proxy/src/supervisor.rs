//! One listening port: its binding, elector and forwarder.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::info;

use crate::elector::{Elector, ElectorConfig, PortBinding};
use crate::forwarder::{Forwarder, ForwarderConfig};
use crate::stats::GlobalStats;

/// Settings shared by every port of the process.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// Candidate nodes, in tie-break order.
    pub nodes: Arc<[String]>,
    /// Optional credential sent before the role query.
    pub auth: Option<Arc<str>>,
    /// Local address the listening sockets bind to.
    pub listen_host: IpAddr,
    pub elector: ElectorConfig,
    pub forwarder: ForwarderConfig,
}

/// Wires one [`Elector`] and one [`Forwarder`] around a shared
/// [`PortBinding`].
pub struct PortSupervisor {
    elector: Elector,
    forwarder: Forwarder,
}

impl PortSupervisor {
    /// Bind the listening socket for `port`.
    ///
    /// The elector does not start until [`run`](Self::run).
    pub async fn bind(
        port: u16,
        settings: &ClusterSettings,
        stats: Arc<GlobalStats>,
    ) -> io::Result<Self> {
        let binding = Arc::new(PortBinding::new(port));

        let forwarder = Forwarder::bind(
            SocketAddr::new(settings.listen_host, port),
            Arc::clone(&binding),
            stats,
            settings.forwarder.clone(),
        )
        .await?;

        let elector = Elector::new(
            Arc::clone(&settings.nodes),
            settings.auth.clone(),
            binding,
            settings.elector.clone(),
        );

        Ok(Self { elector, forwarder })
    }

    /// The port's published master.
    pub fn binding(&self) -> Arc<PortBinding> {
        Arc::clone(self.elector.binding())
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.forwarder.local_addr()
    }

    /// Start following the master and serve connections.
    ///
    /// Only returns if the accept loop fails to start.
    pub async fn run(self) -> io::Result<()> {
        let port = self.elector.binding().port();
        info!(port, "Serving port");

        let elector = tokio::spawn(self.elector.run());
        let result = self.forwarder.run().await;
        elector.abort();
        result
    }
}
