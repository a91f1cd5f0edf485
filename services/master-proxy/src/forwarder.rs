//! Client connection forwarding.
//!
//! The forwarder accepts connections on one listening port and splices each
//! of them to whatever master the port's [`PortBinding`] holds at accept
//! time:
//!
//! - No master known: the connection is closed right away, nothing is dialed.
//! - Master known: the session is counted and handed to its own task, so the
//!   accept loop never waits on a dial or on traffic.
//!
//! A session stays on the master it was dialed to for its whole life. Later
//! elections only affect new connections.
//!
//! Each session runs two copy tasks, one per direction. When either ends (EOF
//! or error) it cancels the session, so the paired task stops too and both
//! sockets get closed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::elector::PortBinding;
use crate::stats::GlobalStats;

/// Default connect timeout when dialing the master.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Default TCP keep-alive period on both session sockets.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5);

/// Forwarder tunables.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Connect timeout for the master side of a session.
    pub dial_timeout: Duration,
    /// Keep-alive idle time and probe interval.
    pub keepalive: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Accept loop for one listening port.
pub struct Forwarder {
    listener: TcpListener,
    binding: Arc<PortBinding>,
    stats: Arc<GlobalStats>,
    config: ForwarderConfig,
}

impl Forwarder {
    /// Bind the listening socket.
    pub async fn bind(
        bind_addr: SocketAddr,
        binding: Arc<PortBinding>,
        stats: Arc<GlobalStats>,
        config: ForwarderConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            port = binding.port(),
            "Listener bound"
        );

        Ok(Self {
            listener,
            binding,
            stats,
            config,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr).await,
                Err(e) => {
                    error!(bind_addr = %local_addr, error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Route one accepted connection to the current master, or refuse it.
    async fn dispatch(&self, client: TcpStream, peer_addr: SocketAddr) {
        let Some(master) = self.binding.current().await else {
            self.stats.record_refused();
            debug!(
                peer_addr = %peer_addr,
                port = self.binding.port(),
                "No master, closing connection"
            );
            return;
        };

        self.stats.record_session();

        tokio::spawn(
            proxy_session(
                client,
                master,
                self.config.clone(),
                Arc::clone(&self.stats),
            )
            .instrument(tracing::info_span!("session", peer = %peer_addr, master = %master)),
        );
    }
}

/// Dial the master and splice the two sockets.
async fn proxy_session(
    client: TcpStream,
    master: SocketAddr,
    config: ForwarderConfig,
    stats: Arc<GlobalStats>,
) {
    let upstream = match timeout(config.dial_timeout, TcpStream::connect(master)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            stats.record_dial_failure();
            warn!(error = %e, "Master connection failed");
            return;
        }
        Err(_) => {
            stats.record_dial_failure();
            warn!(
                timeout_ms = config.dial_timeout.as_millis() as u64,
                "Master connection timed out"
            );
            return;
        }
    };

    for (side, stream) in [("client", &client), ("master", &upstream)] {
        if let Err(e) = set_keepalive(stream, config.keepalive) {
            debug!(side, error = %e, "Failed to enable keep-alive");
        }
    }

    debug!("Session established");

    let session = CancellationToken::new();
    let (client_read, client_write) = client.into_split();
    let (master_read, master_write) = upstream.into_split();

    tokio::spawn(
        pipe(
            client_read,
            master_write,
            session.clone(),
            Arc::clone(&stats),
            Direction::ToMaster,
        )
        .in_current_span(),
    );
    tokio::spawn(
        pipe(
            master_read,
            client_write,
            session,
            stats,
            Direction::ToClient,
        )
        .in_current_span(),
    );
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ToMaster,
    ToClient,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::ToMaster => "client->master",
            Self::ToClient => "master->client",
        }
    }
}

/// One direction of a session.
///
/// Runs until its source ends or errors, or the other direction finishes.
/// Dropping the guards on any exit path closes the session and releases the
/// active-pipe count.
async fn pipe(
    mut src: OwnedReadHalf,
    mut dst: OwnedWriteHalf,
    session: CancellationToken,
    stats: Arc<GlobalStats>,
    direction: Direction,
) {
    let _active = stats.pipe_guard();
    let _close_session = session.clone().drop_guard();

    let copied = tokio::select! {
        result = tokio::io::copy(&mut src, &mut dst) => Some(result),
        _ = session.cancelled() => None,
    };

    match copied {
        Some(Ok(bytes)) => debug!(direction = direction.as_str(), bytes, "Pipe closed"),
        Some(Err(e)) => debug!(direction = direction.as_str(), error = %e, "Pipe error"),
        None => debug!(direction = direction.as_str(), "Pipe closed by peer direction"),
    }

    drop(src);
    drop(dst);
}

fn set_keepalive(stream: &TcpStream, period: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(period);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", windows))]
    let keepalive = keepalive.with_interval(period);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_forwarder_config_default() {
        let config = ForwarderConfig::default();
        assert_eq!(config.dial_timeout, Duration::from_secs(3));
        assert_eq!(config.keepalive, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_set_keepalive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        set_keepalive(&stream, DEFAULT_KEEPALIVE).unwrap();
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_refuses_while_searching() {
        let binding = Arc::new(PortBinding::new(6379));
        let stats = Arc::new(GlobalStats::new());
        let forwarder = Forwarder::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&binding),
            Arc::clone(&stats),
            ForwarderConfig::default(),
        )
        .await
        .unwrap();
        let addr = forwarder.local_addr().unwrap();
        let handle = tokio::spawn(forwarder.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("connection should be closed promptly")
            .unwrap_or(0);

        assert_eq!(n, 0);
        assert_eq!(stats.sessions_proxied(), 0);
        assert_eq!(stats.sessions_refused(), 1);

        handle.abort();
    }
}
