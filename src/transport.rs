//! Seams between the orchestrator and the SSH transport.
//!
//! The orchestrator and the monitor are generic over these traits so a run can
//! be driven against a scripted fake as well as a real russh session.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::exec::{CommandResult, RemoteCommand};
use crate::forwarding::ForwardingSpec;
use crate::ssh::{SshConfig, SshError};

/// Establishes transport sessions
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: TransportSession;

    /// Fails with `AuthenticationFailed` when credentials are rejected and
    /// `ConnectionFailed`/`Timeout` when the host cannot be reached.
    async fn connect(&self, config: &SshConfig) -> Result<Self::Session, SshError>;
}

/// Executes remote commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion. A non-zero exit status is returned as a
    /// normal [`CommandResult`]; `Err` means the session could not run it.
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandResult, SshError>;
}

/// An authenticated session supporting command execution and one local forward
#[async_trait]
pub trait TransportSession: CommandRunner {
    /// Bind the local endpoint and start relaying. Returns the bound address.
    async fn start_forward(&mut self, spec: &ForwardingSpec) -> Result<SocketAddr, SshError>;

    /// Stop the active forward. No-op when none is running.
    async fn stop_forward(&mut self);

    /// Release the connection and any active forward. Idempotent.
    async fn disconnect(&mut self);
}
