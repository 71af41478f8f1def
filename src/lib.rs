//! pve-tunnel: SSH tunnel-backed live migration for Proxmox VE
//!
//! Opens an SSH session to the migration source, forwards a local port to the
//! destination node through it, launches the migration and polls the VM's
//! status on the source until it is stopped or gone.

pub mod cli;
pub mod config;
pub mod events;
pub mod exec;
pub mod forwarding;
pub mod migration;
pub mod monitor;
pub mod orchestrator;
pub mod ssh;
pub mod transport;

pub use config::RunConfig;
pub use events::{RunEvent, RunEventEmitter};
pub use exec::{CommandResult, RemoteCommand};
pub use forwarding::ForwardingSpec;
pub use migration::{ApiToken, MigrationTarget};
pub use monitor::{CompletionPredicate, MonitorConfig, MonitorOutcome, OperationMonitor, SubstringPredicate};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use ssh::{SshConnector, SshError};
pub use transport::{CommandRunner, Connector, TransportSession};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
