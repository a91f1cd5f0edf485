//! Discovery probe against a single cluster node.
//!
//! The probe speaks just enough of the store's text protocol to ask a node
//! for its replication role:
//!
//! ```text
//! AUTH <credential>\r\n      (only when a credential is configured)
//! info replication\r\n
//! ```
//!
//! The reply is read once into a fixed-size buffer and searched for
//! `role:master` or `-NOAUTH`. Nothing else about the reply is interpreted.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProbeError;

/// Upper bound on the reply bytes inspected by a probe.
pub const PROBE_BUFFER_SIZE: usize = 4096;

const MASTER_MARKER: &[u8] = b"role:master";
const NOAUTH_MARKER: &[u8] = b"-NOAUTH";

/// Classification of a probe reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Node reports itself as master.
    Master,
    /// Node refused the probe for lack of (valid) credentials.
    AuthRequired,
    /// Anything else: replica, error, empty or garbage.
    Other,
}

/// Classify a raw probe reply.
///
/// The master marker wins over the auth marker, so a pipelined reply that
/// rejects `AUTH` but still answers the role query counts as master.
pub fn classify_reply(reply: &[u8]) -> Reply {
    if contains(reply, MASTER_MARKER) {
        Reply::Master
    } else if contains(reply, NOAUTH_MARKER) {
        Reply::AuthRequired
    } else {
        Reply::Other
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Build the probe command for an optional credential.
pub fn probe_command(auth: Option<&str>) -> Vec<u8> {
    match auth {
        Some(credential) => format!("AUTH {credential}\r\ninfo replication\r\n").into_bytes(),
        None => b"info replication\r\n".to_vec(),
    }
}

/// Outcome of a probe that reached the node and got an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Node is master; carries the peer address the probe actually used.
    Master(SocketAddr),
    /// Node rejected the credential (or requires one).
    AuthRejected,
    /// Node answered but is not master.
    NotMaster,
}

impl ProbeOutcome {
    /// The master address, if this outcome confirms one.
    pub fn master_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Master(addr) => Some(*addr),
            _ => None,
        }
    }
}

/// Probe `node` on `port`.
///
/// `probe_timeout` bounds the connect and the single read separately.
pub async fn probe_node(
    node: &str,
    port: u16,
    auth: Option<&str>,
    probe_timeout: Duration,
) -> Result<ProbeOutcome, ProbeError> {
    let mut stream = match timeout(probe_timeout, TcpStream::connect((node, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(ProbeError::Connect {
                node: node.to_string(),
                port,
                source,
            })
        }
        Err(_) => {
            return Err(ProbeError::ConnectTimeout {
                node: node.to_string(),
                port,
            })
        }
    };

    let peer_addr = stream.peer_addr().map_err(|source| ProbeError::Connect {
        node: node.to_string(),
        port,
        source,
    })?;

    stream
        .write_all(&probe_command(auth))
        .await
        .map_err(|source| ProbeError::Write {
            node: node.to_string(),
            port,
            source,
        })?;

    let mut buf = [0u8; PROBE_BUFFER_SIZE];
    let n = match timeout(probe_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(source)) => {
            return Err(ProbeError::Read {
                node: node.to_string(),
                port,
                source,
            })
        }
        Err(_) => {
            return Err(ProbeError::ReadTimeout {
                node: node.to_string(),
                port,
            })
        }
    };

    Ok(match classify_reply(&buf[..n]) {
        Reply::Master => ProbeOutcome::Master(peer_addr),
        Reply::AuthRequired => ProbeOutcome::AuthRejected,
        Reply::Other => ProbeOutcome::NotMaster,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_classify_master() {
        let reply = b"$88\r\n# Replication\r\nrole:master\r\nconnected_slaves:1\r\n";
        assert_eq!(classify_reply(reply), Reply::Master);
    }

    #[test]
    fn test_classify_replica() {
        let reply = b"$60\r\n# Replication\r\nrole:slave\r\nmaster_host:10.0.0.1\r\n";
        assert_eq!(classify_reply(reply), Reply::Other);
    }

    #[test]
    fn test_classify_noauth() {
        assert_eq!(
            classify_reply(b"-NOAUTH Authentication required.\r\n"),
            Reply::AuthRequired
        );
    }

    #[test]
    fn test_classify_empty_and_garbage() {
        assert_eq!(classify_reply(b""), Reply::Other);
        assert_eq!(classify_reply(b"role:mast"), Reply::Other);
        assert_eq!(classify_reply(b"-ERR unknown command"), Reply::Other);
    }

    #[test]
    fn test_probe_command() {
        assert_eq!(probe_command(None), b"info replication\r\n");
        assert_eq!(
            probe_command(Some("hunter2")),
            b"AUTH hunter2\r\ninfo replication\r\n"
        );
    }

    async fn one_shot_node(reply: &'static [u8]) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(reply).await.unwrap();
            buf.truncate(n);
            buf
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_probe_master_returns_peer_addr() {
        let (port, node) = one_shot_node(b"role:master\r\n").await;

        let outcome = probe_node("127.0.0.1", port, Some("secret"), Duration::from_secs(1))
            .await
            .unwrap();

        let addr = outcome.master_addr().expect("should be master");
        assert_eq!(addr.port(), port);
        assert!(addr.ip().is_loopback());

        let received = node.await.unwrap();
        assert_eq!(received, b"AUTH secret\r\ninfo replication\r\n");
    }

    #[tokio::test]
    async fn test_probe_noauth() {
        let (port, _node) = one_shot_node(b"-NOAUTH Authentication required.\r\n").await;
        let outcome = probe_node("127.0.0.1", port, None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::AuthRejected);
    }

    #[tokio::test]
    async fn test_probe_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = probe_node("127.0.0.1", port, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_connect());
    }

    #[tokio::test]
    async fn test_probe_silent_node_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = probe_node("127.0.0.1", port, None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::ReadTimeout { .. }));
    }
}
