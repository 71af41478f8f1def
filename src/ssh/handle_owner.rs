//! Handle Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. The command runner and the
//! port forwarder talk to it through a cloneable [`HandleController`], which
//! sends requests over an mpsc channel and awaits the reply on a oneshot.
//!
//! This keeps the exec channel and the forwarding channels independent: each
//! request only holds the handle for the duration of a channel open, never
//! across the lifetime of a command or a relayed connection.
//!
//! ```ignore
//! let controller = spawn_handle_owner_task(handle, "10.0.0.1:22".into());
//! let channel = controller.open_session_channel().await?;
//! ```

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for exec)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Open a direct-tcpip channel (for local forward)
    ChannelOpenDirectTcpip {
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// Cloning is cheap (copies the sender). Any holder can open channels or
/// disconnect, so it must stay inside the process.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    /// Fired once when the owner task exits. Forwarders listen on it.
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    /// Create a controller around a raw command sender.
    ///
    /// Used by tests; production code goes through `spawn_handle_owner_task`.
    pub fn new(cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        let (disconnect_tx, _) = broadcast::channel(1);
        Self {
            cmd_tx,
            disconnect_tx,
        }
    }

    /// Subscribe to SSH disconnect notifications.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    /// Open a session channel (for exec)
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ExecutionFailed(format!("Failed to open session channel: {}", e)))
    }

    /// Open a direct-tcpip channel (for local forward)
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_host: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenDirectTcpip {
                host: host.to_string(),
                port,
                originator_host: originator_host.to_string(),
                originator_port,
                reply_tx,
            })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| {
                SshError::ForwardingFailed(format!(
                    "Failed to open direct-tcpip channel to {}:{}: {}",
                    host, port, e
                ))
            })
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes the Handle and returns a `HandleController` for sending commands.
/// `label` is only used for logging.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, label: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        info!("Handle owner task started for {}", label);

        loop {
            match cmd_rx.recv().await {
                Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving channel_open_session result");
                    }
                }
                Some(HandleCommand::ChannelOpenDirectTcpip {
                    host,
                    port,
                    originator_host,
                    originator_port,
                    reply_tx,
                }) => {
                    let result = handle
                        .channel_open_direct_tcpip(&host, port, &originator_host, originator_port)
                        .await;
                    if reply_tx.send(result).is_err() {
                        warn!("Caller dropped before receiving direct_tcpip result");
                    }
                }
                Some(HandleCommand::Disconnect) => {
                    info!("Disconnect requested for {}", label);
                    break;
                }
                None => {
                    info!("All controllers dropped for {}", label);
                    break;
                }
            }
        }

        // Wake forwarders first so they stop accepting before the transport goes away
        let _ = disconnect_tx_clone.send(());

        drain_pending_commands(&mut cmd_rx);

        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for {}", label);
    });

    HandleController {
        cmd_tx,
        disconnect_tx,
    }
}

/// Reply `Disconnect` to every command still queued
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::ChannelOpenDirectTcpip { reply_tx, .. } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_owner_reports_disconnected() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);
        assert!(controller.is_connected());

        drop(cmd_rx);
        assert!(!controller.is_connected());
        assert!(matches!(
            controller.open_session_channel().await,
            Err(SshError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_dropped_reply_reports_disconnected() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let controller = HandleController::new(cmd_tx);

        // Owner receives the request but never answers
        tokio::spawn(async move {
            let _ = cmd_rx.recv().await;
        });

        let result = controller
            .open_direct_tcpip("10.0.0.2", 22, "127.0.0.1", 0)
            .await;
        assert!(matches!(result, Err(SshError::Disconnected)));
    }

    #[tokio::test]
    async fn test_drain_answers_pending_requests() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .unwrap();

        drain_pending_commands(&mut cmd_rx);

        let reply = reply_rx.await.unwrap();
        assert!(matches!(reply, Err(russh::Error::Disconnect)));
    }
}
