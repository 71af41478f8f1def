//! SSH Transport Session
//!
//! An authenticated connection to one host. Commands run on their own session
//! channels; the (single) local forward runs on direct-tcpip channels driven by
//! background tasks. Both go through the same [`HandleController`].

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::{info, warn};

use super::error::SshError;
use super::handle_owner::HandleController;
use crate::exec::{execute_command, CommandResult, RemoteCommand};
use crate::forwarding::{start_local_forward, ForwardStats, ForwardingSpec, LocalForwardHandle};
use crate::transport::{CommandRunner, TransportSession};

pub struct SshSession {
    controller: HandleController,
    /// `host:port` of the remote side, for logging
    label: String,
    forward: Option<LocalForwardHandle>,
    disconnected: bool,
}

impl SshSession {
    pub fn new(controller: HandleController, label: String) -> Self {
        Self {
            controller,
            label,
            forward: None,
            disconnected: false,
        }
    }

    pub fn controller(&self) -> &HandleController {
        &self.controller
    }

    /// True until `disconnect` is called or the connection drops
    pub fn is_connected(&self) -> bool {
        !self.disconnected && self.controller.is_connected()
    }

    /// Statistics of the active forward, if any
    pub fn forward_stats(&self) -> Option<ForwardStats> {
        self.forward.as_ref().map(|f| f.stats())
    }
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandResult, SshError> {
        if self.disconnected {
            return Err(SshError::ExecutionFailed(format!(
                "Session to {} is disconnected",
                self.label
            )));
        }
        execute_command(&self.controller, command).await
    }
}

#[async_trait]
impl TransportSession for SshSession {
    async fn start_forward(&mut self, spec: &ForwardingSpec) -> Result<SocketAddr, SshError> {
        if !self.is_connected() {
            return Err(SshError::ForwardingFailed(format!(
                "Session to {} is not connected",
                self.label
            )));
        }
        if let Some(active) = &self.forward {
            if active.is_running() {
                return Err(SshError::ForwardingFailed(format!(
                    "A forward is already active on {}",
                    active.bound_addr
                )));
            }
        }

        let handle = start_local_forward(self.controller.clone(), spec.clone()).await?;
        let bound = handle.bound_addr;
        self.forward = Some(handle);
        Ok(bound)
    }

    async fn stop_forward(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.stop().await;
        }
    }

    async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.stop_forward().await;

        info!("Disconnecting from {}", self.label);
        self.controller.disconnect().await;
        self.disconnected = true;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if !self.disconnected && self.controller.is_connected() {
            // Dropping the last controller ends the owner task, which closes the connection
            warn!("SshSession to {} dropped without explicit disconnect", self.label);
        }
    }
}
