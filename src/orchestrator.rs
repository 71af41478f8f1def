//! Orchestrator
//!
//! Sequences one run: validate -> connect -> forward -> launch -> monitor ->
//! teardown. Once the session is up, every exit path goes through teardown
//! exactly once.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::events::{RunEvent, RunEventEmitter};
use crate::monitor::{CompletionPredicate, MonitorOutcome, OperationMonitor};
use crate::ssh::SshError;
use crate::transport::{CommandRunner, Connector, TransportSession};

/// How a run ended, when it did not end on an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The completion predicate matched
    Completed { polls: u32 },
    /// Attempt budget exhausted; the operation may still be running
    TimedOut { polls: u32 },
    /// The launch command did not exit with status 0; nothing was monitored
    LaunchFailed {
        exit_status: Option<u32>,
        stderr: String,
    },
    /// Cancellation signal received
    Cancelled,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } => 0,
            RunOutcome::LaunchFailed { .. } => 2,
            RunOutcome::TimedOut { .. } => 3,
            RunOutcome::Cancelled => 130,
        }
    }
}

pub struct Orchestrator<C> {
    connector: C,
    config: RunConfig,
    emitter: RunEventEmitter,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(connector: C, config: RunConfig) -> Self {
        Self {
            connector,
            config,
            emitter: RunEventEmitter::noop(),
        }
    }

    pub fn with_emitter(mut self, emitter: RunEventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run with the predicate built from the configured completion indicators
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome, SshError> {
        let predicate = self.config.predicate();
        self.run_with_predicate(predicate, cancel).await
    }

    pub async fn run_with_predicate<P: CompletionPredicate>(
        &self,
        predicate: P,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SshError> {
        let ssh_config = self.config.validate().inspect_err(|e| self.abort(e))?;

        let mut session = self
            .connector
            .connect(&ssh_config)
            .await
            .inspect_err(|e| self.abort(e))?;
        info!("Connected to {}:{}", ssh_config.host, ssh_config.port);
        self.emitter.emit(RunEvent::Connected {
            host: ssh_config.host.clone(),
        });

        let spec = self.config.forwarding_spec();
        let bound = match session.start_forward(&spec).await {
            Ok(bound) => bound,
            Err(e) => {
                warn!("Failed to start forward {}: {}", spec.local_addr(), e);
                self.abort(&e);
                session.disconnect().await;
                self.emitter.emit(RunEvent::TornDown);
                return Err(e);
            }
        };
        info!(
            "Forwarding {} -> {}:{}",
            bound, spec.destination_host, spec.destination_port
        );
        self.emitter.emit(RunEvent::ForwardingActive {
            local_addr: bound.to_string(),
            destination: format!("{}:{}", spec.destination_host, spec.destination_port),
        });

        let result = self.drive(&session, predicate, cancel).await;

        self.teardown(&mut session).await;

        result.inspect_err(|e| self.abort(e))
    }

    /// Launch, monitor and optionally hold the tunnel
    async fn drive<P: CompletionPredicate>(
        &self,
        session: &C::Session,
        predicate: P,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, SshError> {
        if cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        let launch = self.config.target.launch_command();
        info!("Launching: {}", launch);
        self.emitter.emit(RunEvent::LaunchStarted {
            command: launch.to_string(),
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(self.cancelled()),
            result = session.execute(&launch) => result?,
        };

        if !result.is_success() {
            error!(
                "Launch command failed with exit status {:?}: {}",
                result.exit_status,
                result.stderr.trim()
            );
            self.emitter.emit(RunEvent::LaunchFailed {
                exit_status: result.exit_status,
                stderr: result.stderr.clone(),
            });
            return Ok(RunOutcome::LaunchFailed {
                exit_status: result.exit_status,
                stderr: result.stderr,
            });
        }

        let outcome = OperationMonitor::new(
            session,
            self.config.target.status_command(),
            predicate,
            self.config.monitor.clone(),
        )
        .with_emitter(self.emitter.clone())
        .run(cancel)
        .await?;

        let outcome = match outcome {
            MonitorOutcome::Completed { polls } => {
                self.emitter.emit(RunEvent::Completed { polls });
                RunOutcome::Completed { polls }
            }
            MonitorOutcome::TimedOut { polls } => {
                self.emitter.emit(RunEvent::TimedOut { polls });
                RunOutcome::TimedOut { polls }
            }
            MonitorOutcome::Cancelled { .. } => return Ok(self.cancelled()),
        };

        if self.config.hold_tunnel {
            info!("Holding tunnel open until cancelled");
            self.emitter.emit(RunEvent::HoldingTunnel);
            cancel.cancelled().await;
        }

        Ok(outcome)
    }

    async fn teardown(&self, session: &mut C::Session) {
        session.stop_forward().await;
        session.disconnect().await;
        info!("Tunnel closed");
        self.emitter.emit(RunEvent::TornDown);
    }

    fn cancelled(&self) -> RunOutcome {
        info!("Run cancelled");
        self.emitter.emit(RunEvent::Cancelled);
        RunOutcome::Cancelled
    }

    fn abort(&self, e: &SshError) {
        error!("Run aborted: {}", e);
        self.emitter.emit(RunEvent::Aborted {
            error: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Completed { polls: 2 }.exit_code(), 0);
        assert_eq!(
            RunOutcome::LaunchFailed {
                exit_status: Some(1),
                stderr: String::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(RunOutcome::TimedOut { polls: 30 }.exit_code(), 3);
        assert_eq!(RunOutcome::Cancelled.exit_code(), 130);
    }
}
