//! Proxy configuration.
//!
//! Values come from the command line or `MASTER_PROXY_*` environment
//! variables, optionally layered over a TOML file given with `--config`.
//! Command line and environment win over the file.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::elector::{ElectorConfig, DEFAULT_PROBE_TIMEOUT};
use crate::error::ConfigError;
use crate::forwarder::ForwarderConfig;
use crate::supervisor::ClusterSettings;

/// Default bind address for listening ports (all interfaces).
pub const DEFAULT_LISTEN_HOST: &str = "::";

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "master-proxy",
    version,
    about = "Forwards TCP ports to the current master of a replicated key-value cluster"
)]
pub struct Args {
    /// Comma-separated list of cluster node hostnames, in preference order.
    #[arg(long, env = "MASTER_PROXY_NODES", value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Comma-separated list of listening ports.
    #[arg(long, env = "MASTER_PROXY_PORTS", value_delimiter = ',')]
    pub ports: Vec<String>,

    /// Credential sent with AUTH before the role query.
    #[arg(long, env = "MASTER_PROXY_AUTH", hide_env_values = true)]
    pub auth: Option<String>,

    /// Base probe timeout in seconds (later attempts wait longer).
    #[arg(long, env = "MASTER_PROXY_PROBE_TIMEOUT")]
    pub probe_timeout: Option<f64>,

    /// Local address to bind listening ports on.
    #[arg(long, env = "MASTER_PROXY_LISTEN_HOST")]
    pub listen_host: Option<String>,

    /// Optional TOML config file.
    #[arg(long, env = "MASTER_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "MASTER_PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// On-disk configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    pub auth: Option<String>,
    pub probe_timeout_secs: Option<f64>,
    pub listen_host: Option<String>,
}

impl FileConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Validated configuration. Immutable once loaded.
#[derive(Clone)]
pub struct Config {
    /// Candidate nodes, in tie-break order.
    pub nodes: Vec<String>,
    /// Listening ports, in configured order.
    pub ports: Vec<u16>,
    /// Shared credential, if any.
    pub auth: Option<String>,
    /// Probe timeout of the first election attempt.
    pub probe_timeout: Duration,
    /// Bind address for listening ports.
    pub listen_host: IpAddr,
    /// Log level filter when RUST_LOG is unset.
    pub log_level: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("nodes", &self.nodes)
            .field("ports", &self.ports)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("probe_timeout", &self.probe_timeout)
            .field("listen_host", &self.listen_host)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Parse process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(Args::parse())
    }

    /// Merge parsed arguments over the optional config file and validate.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let nodes = non_empty_entries(args.nodes);
        let nodes = if nodes.is_empty() {
            non_empty_entries(file.nodes)
        } else {
            nodes
        };
        if nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        let ports = parse_ports(&args.ports)?;
        let ports = if ports.is_empty() {
            validate_ports(file.ports)?
        } else {
            ports
        };
        if ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }

        let auth = args.auth.or(file.auth).filter(|a| !a.is_empty());

        let probe_timeout = match args.probe_timeout.or(file.probe_timeout_secs) {
            Some(secs) => parse_timeout(secs)?,
            None => DEFAULT_PROBE_TIMEOUT,
        };

        let listen_host_raw = args
            .listen_host
            .or(file.listen_host)
            .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
        let listen_host = listen_host_raw
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidListenHost(listen_host_raw.clone()))?;

        Ok(Self {
            nodes,
            ports,
            auth,
            probe_timeout,
            listen_host,
            log_level: args.log_level,
        })
    }

    /// Settings handed to every port supervisor.
    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            nodes: Arc::from(self.nodes.clone()),
            auth: self.auth.as_deref().map(Arc::from),
            listen_host: self.listen_host,
            elector: ElectorConfig {
                base_timeout: self.probe_timeout,
                ..ElectorConfig::default()
            },
            forwarder: ForwarderConfig::default(),
        }
    }
}

fn non_empty_entries(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

fn parse_ports(entries: &[String]) -> Result<Vec<u16>, ConfigError> {
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|e| match e.parse::<u16>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidPort(e.to_string())),
            Ok(port) => Ok(port),
        })
        .collect()
}

fn validate_ports(ports: Vec<u16>) -> Result<Vec<u16>, ConfigError> {
    if ports.contains(&0) {
        return Err(ConfigError::InvalidPort("0".to_string()));
    }
    Ok(ports)
}

fn parse_timeout(secs: f64) -> Result<Duration, ConfigError> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(ConfigError::InvalidTimeout(secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidTimeout(secs))
}
