//! Per-request SSH port forwarding.
//!
//! A tunnel binds an ephemeral port on 127.0.0.1 and forwards every connection
//! accepted there to the target database through a `direct-tcpip` channel on
//! one SSH session. Each tunnel serves exactly one request and is closed by the
//! `ConnectionFactory` when that request finishes.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseProfile, TunnelProfile};
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{decode_secret_key, ssh_key};
use russh::{Channel, ChannelStream, Disconnect};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Loopback address the tunnel listens on and the driver connects to.
pub const TUNNEL_BIND_ADDR: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// An open forward owned by a single request.
pub trait Tunnel: Send {
    /// Port on 127.0.0.1 that reaches the target database.
    fn local_port(&self) -> u16;

    /// Release the listener and the SSH session. Never fails; problems are logged.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens tunnels to a profile's database host.
pub trait TunnelOpener: Send + Sync {
    type Tunnel: Tunnel;

    /// Open a forward from an ephemeral local port to `target.host:target.port`.
    ///
    /// Anything acquired before a failure is released before the error is returned.
    fn open(
        &self,
        tunnel: &TunnelProfile,
        target: &DatabaseProfile,
    ) -> impl Future<Output = DbResult<Self::Tunnel>> + Send;
}

/// Accepts any server host key, as the bastion's key is not pinned anywhere.
struct AcceptingHandler;

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(algorithm = %server_public_key.algorithm(), "Server key accepted without verification");
        Ok(true)
    }
}

type SshSession = client::Handle<AcceptingHandler>;

/// russh-backed tunnel opener.
#[derive(Clone)]
pub struct SshTunnelManager {
    config: Arc<client::Config>,
}

impl SshTunnelManager {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }

    /// Connect to the bastion and authenticate with the decoded key.
    async fn establish(
        &self,
        tunnel: &TunnelProfile,
        key: ssh_key::PrivateKey,
    ) -> Result<SshSession, String> {
        let mut session = client::connect(
            self.config.clone(),
            (tunnel.ssh_host.as_str(), tunnel.ssh_port),
            AcceptingHandler,
        )
        .await
        .map_err(|e| format!("SSH connection failed: {}", e))?;

        let outcome = async {
            let best_hash = session
                .best_supported_rsa_hash()
                .await
                .map_err(|e| format!("Failed to negotiate RSA hash: {}", e))?
                .flatten();

            let auth = session
                .authenticate_publickey(
                    tunnel.ssh_user.clone(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), best_hash),
                )
                .await
                .map_err(|e| format!("SSH authentication failed: {}", e))?;

            if auth.success() {
                Ok(())
            } else {
                Err(format!(
                    "SSH authentication rejected for user '{}'",
                    tunnel.ssh_user
                ))
            }
        }
        .await;

        match outcome {
            Ok(()) => Ok(session),
            Err(message) => {
                disconnect(&session).await;
                Err(message)
            }
        }
    }
}

impl Default for SshTunnelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelOpener for SshTunnelManager {
    type Tunnel = SshTunnel;

    async fn open(&self, tunnel: &TunnelProfile, target: &DatabaseProfile) -> DbResult<SshTunnel> {
        let fail = |message: String| DbError::tunnel(&target.name, &tunnel.ssh_host, message);

        // 1. Key material, before any network activity.
        let key_path = &tunnel.private_key_path;
        let key_material = tokio::fs::read_to_string(key_path).await.map_err(|e| {
            fail(format!(
                "Cannot read SSH private key {}: {}",
                key_path.display(),
                e
            ))
        })?;
        let key = decode_secret_key(&key_material, None).map_err(|e| {
            fail(format!(
                "Cannot decode SSH private key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        // 2. Ephemeral local listener. Dropped (closed) on every early return below.
        let listener = TcpListener::bind((TUNNEL_BIND_ADDR, 0))
            .await
            .map_err(|e| fail(format!("Cannot bind local tunnel port: {}", e)))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| fail(format!("Cannot read local tunnel port: {}", e)))?
            .port();

        // 3. SSH session.
        debug!(
            ssh_host = %tunnel.ssh_host,
            ssh_port = tunnel.ssh_port,
            ssh_user = %tunnel.ssh_user,
            "Connecting to SSH bastion"
        );
        let session = self.establish(tunnel, key).await.map_err(fail)?;

        // 4. Forward registration: the first channel proves the bastion will
        // forward to the target and is handed to the first local connection.
        let first_channel = match session
            .channel_open_direct_tcpip(
                target.host.clone(),
                u32::from(target.port),
                TUNNEL_BIND_ADDR.to_string(),
                u32::from(local_port),
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                disconnect(&session).await;
                return Err(fail(format!(
                    "Port forwarding to {}:{} refused: {}",
                    target.host, target.port, e
                )));
            }
        };

        let session = Arc::new(session);
        let channels = DirectTcpip {
            session: session.clone(),
            host: target.host.clone(),
            port: target.port,
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_loop(
            listener,
            Arc::new(channels),
            first_channel.into_stream(),
            shutdown_rx,
        ));

        info!(
            profile = %target.name,
            local_port,
            ssh_host = %tunnel.ssh_host,
            "SSH tunnel open: 127.0.0.1:{} -> {}:{}",
            local_port,
            target.host,
            target.port
        );

        Ok(SshTunnel {
            local_port,
            session,
            shutdown: shutdown_tx,
            forwarder,
        })
    }
}

/// An open russh tunnel.
///
/// Dropping it without `close` still stops the forwarder, because the shutdown
/// sender goes away with it.
pub struct SshTunnel {
    local_port: u16,
    session: Arc<SshSession>,
    shutdown: oneshot::Sender<()>,
    forwarder: JoinHandle<()>,
}

impl Tunnel for SshTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn close(self) {
        let SshTunnel {
            local_port,
            session,
            shutdown,
            forwarder,
        } = self;

        // Listener: the forwarder owns it and drops it on exit.
        let _ = shutdown.send(());
        if let Err(e) = forwarder.await {
            warn!(local_port, error = %e, "Tunnel forwarder ended abnormally");
        }

        // SSH session: attempted even if the forwarder failed.
        disconnect(&session).await;
        debug!(local_port, "SSH tunnel closed");
    }
}

async fn disconnect(session: &SshSession) {
    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        warn!(error = %e, "Error during SSH disconnect");
    }
}

/// Opens the remote end for each accepted local connection.
trait ChannelSource: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn open(&self, peer: SocketAddr) -> impl Future<Output = Result<Self::Stream, String>> + Send;
}

/// `direct-tcpip` channels to the target database on one SSH session.
struct DirectTcpip {
    session: Arc<SshSession>,
    host: String,
    port: u16,
}

impl ChannelSource for DirectTcpip {
    type Stream = ChannelStream<client::Msg>;

    async fn open(&self, peer: SocketAddr) -> Result<Self::Stream, String> {
        self.session
            .channel_open_direct_tcpip(
                self.host.clone(),
                u32::from(self.port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
            .map(Channel::into_stream)
            .map_err(|e| e.to_string())
    }
}

/// Delay before accepting again after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    Duration::from_millis(10u64 << failures.clamp(1, 7))
}

/// Accept local connections and bridge each one to its own channel until shutdown.
///
/// Channel opens run inside the bridge tasks, so a bastion that stops answering
/// never delays shutdown.
async fn forward_loop<S: ChannelSource>(
    listener: TcpListener,
    channels: Arc<S>,
    first: S::Stream,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut pending = Some(first);
    // Bridges are aborted when the set is dropped at the end of the loop.
    let mut bridges = JoinSet::new();
    let mut accept_failures = 0u32;

    loop {
        while bridges.try_join_next().is_some() {}

        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => {
                        accept_failures = 0;
                        conn
                    }
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_backoff(accept_failures);
                        warn!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Error accepting tunnel connection"
                        );
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                };

                match pending.take() {
                    Some(remote) => {
                        bridges.spawn(bridge(stream, remote));
                    }
                    None => {
                        let channels = channels.clone();
                        bridges.spawn(async move {
                            match channels.open(peer).await {
                                Ok(remote) => bridge(stream, remote).await,
                                Err(e) => warn!(error = %e, "Failed to open SSH channel"),
                            }
                        });
                    }
                }
            }
        }
    }

    debug!("Tunnel forwarder stopped");
}

async fn bridge<R>(mut local: TcpStream, mut remote: R)
where
    R: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut local, &mut remote).await {
        Ok((sent, received)) => debug!(sent, received, "Tunnel connection closed"),
        Err(e) => debug!(error = %e, "Tunnel connection ended with error"),
    }
}
