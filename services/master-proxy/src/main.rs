//! master-proxy
//!
//! Follows the master of a replicated key-value cluster and forwards client
//! TCP connections on each configured port to it.
//!
//! This binary:
//! - Loads configuration (flags, env, optional TOML file)
//! - Binds every listening port (any failure is fatal)
//! - Signals readiness to the supervisor, if any
//! - Runs one elector + forwarder per port and a periodic status report

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use master_proxy::stats::{run_status_loop, DEFAULT_REPORT_INTERVAL};
use master_proxy::{notify, Config, GlobalStats, PortSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("invalid configuration")?;

    // Journald stamps records itself
    let under_supervisor = notify::supervisor_present();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    tracing_subscriber::registry()
        .with(filter)
        .with(under_supervisor.then(|| tracing_subscriber::fmt::layer().json().without_time()))
        .with((!under_supervisor).then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    info!("Starting master-proxy");
    info!(
        nodes = %config.nodes.join(", "),
        "Watching the following nodes"
    );
    info!(
        ports = ?config.ports,
        listen_host = %config.listen_host,
        probe_timeout_ms = config.probe_timeout.as_millis() as u64,
        auth = config.auth.is_some(),
        "Serving the following ports"
    );

    let settings = config.cluster_settings();
    let stats = Arc::new(GlobalStats::new());

    let mut supervisors = Vec::with_capacity(config.ports.len());
    for &port in &config.ports {
        let supervisor = PortSupervisor::bind(port, &settings, Arc::clone(&stats))
            .await
            .with_context(|| format!("can't open listening socket for port {port}"))?;
        supervisors.push(supervisor);
    }

    let notifier = notify::from_env();
    notifier.ready();

    let mut ports = JoinSet::new();
    for supervisor in supervisors {
        ports.spawn(supervisor.run());
    }

    tokio::spawn(run_status_loop(
        Arc::clone(&stats),
        notifier,
        DEFAULT_REPORT_INTERVAL,
    ));

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
        Some(joined) = ports.join_next() => {
            match joined {
                Ok(Ok(())) => {
                    warn!("Port supervisor exited");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Port supervisor failed");
                    Err(e.into())
                }
                Err(e) => {
                    error!(error = %e, "Port supervisor panicked");
                    Err(e.into())
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
