//! Error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No candidate nodes were configured.
    #[error("must specify at least one node")]
    NoNodes,

    /// No listening ports were configured.
    #[error("must specify at least one listening port")]
    NoPorts,

    /// A port entry is not a valid non-zero port number.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Probe timeout must be a positive number of seconds.
    #[error("invalid probe timeout: {0} (must be greater than zero)")]
    InvalidTimeout(f64),

    /// Listen host is not an IP address.
    #[error("invalid listen host: {0}")]
    InvalidListenHost(String),

    /// Config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for this service.
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failure to complete a discovery probe against one node.
///
/// None of these are fatal: the node is treated as "not master" for the
/// current election cycle.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// TCP connect failed (refused, unreachable, name resolution).
    #[error("can't connect to {node}:{port}: {source}")]
    Connect {
        node: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// TCP connect did not complete in time.
    #[error("connect to {node}:{port} timed out")]
    ConnectTimeout { node: String, port: u16 },

    /// Sending the probe command failed.
    #[error("failed to send probe to {node}:{port}: {source}")]
    Write {
        node: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Reading the reply failed.
    #[error("failed to read probe reply from {node}:{port}: {source}")]
    Read {
        node: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// No reply arrived in time.
    #[error("probe reply from {node}:{port} timed out")]
    ReadTimeout { node: String, port: u16 },
}

impl ProbeError {
    /// Whether the node could not be reached at all (as opposed to a node
    /// that accepted the connection but failed to answer).
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}
