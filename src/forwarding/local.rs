//! Local Port Forwarding
//!
//! Forwards connections from a local port to a host:port reachable from the
//! SSH server. Example: local 127.0.0.1:22222 -> destination node 10.0.0.2:22

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::ssh::{HandleController, SshError};

/// Idle timeout for forwarded connections (5 minutes)
const FORWARD_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long `stop` waits for relayed connections to finish
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Local port forwarding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingSpec {
    /// Local address to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Local port to bind to
    pub local_port: u16,
    /// Host to connect to from the SSH server's side
    pub destination_host: String,
    /// Port on the destination host
    pub destination_port: u16,
}

impl ForwardingSpec {
    pub fn new(local_port: u16, destination_host: impl Into<String>, destination_port: u16) -> Self {
        Self {
            bind_address: default_bind_address(),
            local_port,
            destination_host: destination_host.into(),
            destination_port,
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    /// `bind_address:local_port`, with IPv6 literals bracketed
    pub fn local_addr(&self) -> String {
        if self.bind_address.contains(':') && !self.bind_address.starts_with('[') {
            format!("[{}]:{}", self.bind_address, self.local_port)
        } else {
            format!("{}:{}", self.bind_address, self.local_port)
        }
    }

    /// Ports must be non-zero and the destination named
    pub fn validate(&self) -> Result<(), SshError> {
        if self.local_port == 0 {
            return Err(SshError::Config("Local forward port must be between 1 and 65535".into()));
        }
        if self.destination_port == 0 {
            return Err(SshError::Config(
                "Destination port must be between 1 and 65535".into(),
            ));
        }
        if self.destination_host.trim().is_empty() {
            return Err(SshError::Config("Destination host is empty".into()));
        }
        if self.bind_address.trim().is_empty() {
            return Err(SshError::Config("Local bind address is empty".into()));
        }
        Ok(())
    }
}

pub(crate) fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

/// Statistics for a port forward
#[derive(Debug, Clone, Default, Serialize)]
pub struct ForwardStats {
    /// Total connections handled
    pub connection_count: u64,
    /// Active connections right now
    pub active_connections: u64,
    /// Total bytes sent (client -> server)
    pub bytes_sent: u64,
    /// Total bytes received (server -> client)
    pub bytes_received: u64,
}

/// Handle to a running local port forward
pub struct LocalForwardHandle {
    pub spec: ForwardingSpec,
    /// Actual bound address
    pub bound_addr: SocketAddr,
    running: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    stats: Arc<parking_lot::RwLock<ForwardStats>>,
}

impl LocalForwardHandle {
    /// Stop the port forwarding and wait for active connections to close.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Local port forward on {} already stopped", self.bound_addr);
            return;
        }
        info!("Stopping local port forward on {}", self.bound_addr);
        let _ = self.stop_tx.send(()).await;

        let start = tokio::time::Instant::now();
        while self.stats.read().active_connections > 0 {
            if start.elapsed() > STOP_DRAIN_TIMEOUT {
                warn!(
                    "Timeout waiting for {} active connections to close on {}",
                    self.stats.read().active_connections,
                    self.bound_addr
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Check if the forward is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get current statistics
    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }
}

/// Start local port forwarding
///
/// Binds the local endpoint, then spawns a task that accepts connections and,
/// for each, opens a direct-tcpip channel through SSH and bridges the two.
/// The accept loop ends on `stop`, on handle drop, or when the SSH connection
/// goes away.
pub async fn start_local_forward(
    handle_controller: HandleController,
    spec: ForwardingSpec,
) -> Result<LocalForwardHandle, SshError> {
    let disconnect_rx = handle_controller.subscribe_disconnect();
    start_local_forward_with_disconnect(handle_controller, spec, disconnect_rx).await
}

/// Start local port forwarding with explicit disconnect receiver
pub async fn start_local_forward_with_disconnect(
    handle_controller: HandleController,
    spec: ForwardingSpec,
    mut disconnect_rx: broadcast::Receiver<()>,
) -> Result<LocalForwardHandle, SshError> {
    spec.validate()?;

    if !handle_controller.is_connected() {
        return Err(SshError::ForwardingFailed(
            "SSH session is not connected; cannot establish relay".into(),
        ));
    }

    let local_addr = spec.local_addr();
    let listener = TcpListener::bind(&local_addr)
        .await
        .map_err(|e| bind_error(&local_addr, e))?;

    let bound_addr = listener
        .local_addr()
        .map_err(|e| SshError::BindFailed(format!("Failed to get bound address: {}", e)))?;

    info!(
        "Started local port forward: {} -> {}:{}",
        bound_addr, spec.destination_host, spec.destination_port
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let stats = Arc::new(parking_lot::RwLock::new(ForwardStats::default()));
    let stats_clone = stats.clone();

    let destination_host = spec.destination_host.clone();
    let destination_port = spec.destination_port;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = disconnect_rx.recv() => {
                    info!("Local port forward stopped: SSH disconnected");
                    break;
                }

                // Also fires when the handle is dropped
                _ = stop_rx.recv() => {
                    info!("Local port forward stopped by request");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if !running_clone.load(Ordering::SeqCst) {
                                break;
                            }

                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }

                            debug!("Accepted connection from {} for forward", peer_addr);

                            {
                                let mut s = stats_clone.write();
                                s.connection_count += 1;
                                s.active_connections += 1;
                            }

                            let controller = handle_controller.clone();
                            let host = destination_host.clone();
                            let stats_for_conn = stats_clone.clone();

                            tokio::spawn(async move {
                                let result = handle_forward_connection(
                                    controller,
                                    stream,
                                    peer_addr,
                                    &host,
                                    destination_port,
                                    stats_for_conn.clone(),
                                ).await;

                                {
                                    let mut s = stats_for_conn.write();
                                    s.active_connections = s.active_connections.saturating_sub(1);
                                }

                                if let Err(e) = result {
                                    warn!("Forward connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }

        running_clone.store(false, Ordering::SeqCst);
        info!("Local port forward task exited");
    });

    Ok(LocalForwardHandle {
        spec,
        bound_addr,
        running,
        stop_tx,
        stats,
    })
}

fn bind_error(local_addr: &str, e: std::io::Error) -> SshError {
    match e.kind() {
        std::io::ErrorKind::AddrInUse => SshError::BindFailed(format!(
            "Port already in use: {}. Another application may be using this port.",
            local_addr
        )),
        std::io::ErrorKind::PermissionDenied => SshError::BindFailed(format!(
            "Permission denied binding to {}. Ports below 1024 require elevated privileges.",
            local_addr
        )),
        std::io::ErrorKind::AddrNotAvailable => SshError::BindFailed(format!(
            "Address not available: {}. The specified address is not valid on this system.",
            local_addr
        )),
        _ => SshError::BindFailed(format!("Failed to bind to {}: {}", local_addr, e)),
    }
}

/// Bridge one accepted connection through a direct-tcpip channel
async fn handle_forward_connection(
    handle_controller: HandleController,
    mut local_stream: TcpStream,
    peer_addr: SocketAddr,
    destination_host: &str,
    destination_port: u16,
    stats: Arc<parking_lot::RwLock<ForwardStats>>,
) -> Result<(), SshError> {
    let channel = handle_controller
        .open_direct_tcpip(
            destination_host,
            destination_port as u32,
            &peer_addr.ip().to_string(),
            peer_addr.port() as u32,
        )
        .await?;

    debug!(
        "Opened channel for forward to {}:{}",
        destination_host, destination_port
    );

    let (mut local_read, mut local_write) = local_stream.split();

    // Independent halves: a pending read never blocks a write in the other direction
    let (mut channel_read, channel_write) = channel.split();

    let stats_for_send = stats.clone();
    let stats_for_recv = stats.clone();

    let local_to_remote = async {
        let mut buf = vec![0u8; 32768];
        loop {
            match tokio::time::timeout(FORWARD_IDLE_TIMEOUT, local_read.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    if let Err(e) = channel_write.data(&buf[..n]).await {
                        debug!("Channel write error: {}", e);
                        break;
                    }
                    stats_for_send.write().bytes_sent += n as u64;
                }
                Ok(Err(e)) => {
                    debug!("Local read error: {}", e);
                    break;
                }
                Err(_) => {
                    debug!(
                        "Local read idle timeout ({}s), closing forward connection",
                        FORWARD_IDLE_TIMEOUT.as_secs()
                    );
                    break;
                }
            }
        }
        let _ = channel_write.eof().await;
    };

    let remote_to_local = async {
        loop {
            match tokio::time::timeout(FORWARD_IDLE_TIMEOUT, channel_read.wait()).await {
                Ok(Some(russh::ChannelMsg::Data { data })) => {
                    if let Err(e) = local_write.write_all(&data).await {
                        debug!("Local write error: {}", e);
                        break;
                    }
                    stats_for_recv.write().bytes_received += data.len() as u64;
                }
                Ok(Some(russh::ChannelMsg::Eof)) | Ok(Some(russh::ChannelMsg::Close)) | Ok(None) => {
                    debug!("Channel closed by remote");
                    break;
                }
                Ok(_) => continue,
                Err(_) => {
                    debug!(
                        "Remote read idle timeout ({}s), closing forward connection",
                        FORWARD_IDLE_TIMEOUT.as_secs()
                    );
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = local_to_remote => {}
        _ = remote_to_local => {}
    }

    let _ = channel_write.close().await;

    debug!("Forward connection from {} closed", peer_addr);
    Ok(())
}
