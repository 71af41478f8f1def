//! Operation Monitor
//!
//! Polls a status-query command until a completion predicate holds or the
//! attempt budget runs out.
//!
//! ```text
//! Polling --predicate true--------------------> Completed
//! Polling --false, attempt < max--(wait)------> Polling
//! Polling --false, attempt == max-------------> TimedOut
//! Polling --cancelled during wait-------------> Cancelled
//! ```
//!
//! Polls are strictly sequential. The wait between polls is a cancellable
//! timed suspension; an in-flight poll always runs to completion.

mod predicate;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{RunEvent, RunEventEmitter};
use crate::exec::RemoteCommand;
use crate::ssh::SshError;
use crate::transport::CommandRunner;

pub use predicate::{default_indicators, CompletionPredicate, SubstringPredicate};

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between two polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum number of polls
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl MonitorConfig {
    pub fn new(poll_interval_secs: u64, max_attempts: u32) -> Self {
        Self {
            poll_interval_secs,
            max_attempts,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<(), SshError> {
        if self.max_attempts == 0 {
            return Err(SshError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Terminal state of a monitoring pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MonitorOutcome {
    Completed { polls: u32 },
    TimedOut { polls: u32 },
    Cancelled { polls: u32 },
}

impl MonitorOutcome {
    pub fn polls(&self) -> u32 {
        match *self {
            MonitorOutcome::Completed { polls }
            | MonitorOutcome::TimedOut { polls }
            | MonitorOutcome::Cancelled { polls } => polls,
        }
    }
}

/// Mutable state of one monitoring pass, owned by [`OperationMonitor::run`]
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub completed: bool,
}

impl MonitorState {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval(),
            completed: false,
        }
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

pub struct OperationMonitor<'a, R: ?Sized, P> {
    runner: &'a R,
    status_command: RemoteCommand,
    predicate: P,
    config: MonitorConfig,
    emitter: RunEventEmitter,
}

impl<'a, R, P> OperationMonitor<'a, R, P>
where
    R: CommandRunner + ?Sized,
    P: CompletionPredicate,
{
    pub fn new(
        runner: &'a R,
        status_command: RemoteCommand,
        predicate: P,
        config: MonitorConfig,
    ) -> Self {
        Self {
            runner,
            status_command,
            predicate,
            config,
            emitter: RunEventEmitter::noop(),
        }
    }

    pub fn with_emitter(mut self, emitter: RunEventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Poll until completion, exhaustion or cancellation.
    ///
    /// A poll that cannot be executed ends monitoring with that error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MonitorOutcome, SshError> {
        self.config.validate()?;
        let mut state = MonitorState::new(&self.config);

        loop {
            if cancel.is_cancelled() {
                info!("Monitoring cancelled after {} polls", state.attempt);
                return Ok(MonitorOutcome::Cancelled {
                    polls: state.attempt,
                });
            }

            state.attempt += 1;
            self.emitter.emit(RunEvent::Poll {
                attempt: state.attempt,
                max_attempts: state.max_attempts,
            });
            debug!(
                "Status poll {}/{}: {}",
                state.attempt, state.max_attempts, self.status_command
            );

            let result = self.runner.execute(&self.status_command).await?;
            if !result.is_success() {
                // Missing-VM errors come back with a non-zero status; the predicate still decides
                debug!("Status query exited with {:?}", result.exit_status);
            }

            if self.predicate.is_complete(&result.combined_output()) {
                state.completed = true;
                info!("Operation completed after {} polls", state.attempt);
                return Ok(MonitorOutcome::Completed {
                    polls: state.attempt,
                });
            }

            if state.exhausted() {
                warn!(
                    "Operation not confirmed after {} polls; manual verification required",
                    state.attempt
                );
                return Ok(MonitorOutcome::TimedOut {
                    polls: state.attempt,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Monitoring cancelled after {} polls", state.attempt);
                    return Ok(MonitorOutcome::Cancelled { polls: state.attempt });
                }
                _ = tokio::time::sleep(state.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Replays scripted status texts, repeating the last one once exhausted
    struct ScriptedRunner {
        script: Mutex<VecDeque<String>>,
        last: Mutex<String>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedRunner {
        fn new(script: &[&str]) -> Self {
            Self {
                script: Mutex::new(script.iter().map(|s| s.to_string()).collect()),
                last: Mutex::new(String::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn polls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn execute(&self, _command: &RemoteCommand) -> Result<CommandResult, SshError> {
            self.calls.lock().push(Instant::now());
            let next = self.script.lock().pop_front();
            let text = match next {
                Some(text) => {
                    *self.last.lock() = text.clone();
                    text
                }
                None => self.last.lock().clone(),
            };
            Ok(CommandResult::new(0, text, ""))
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl CommandRunner for FailingRunner {
        async fn execute(&self, _command: &RemoteCommand) -> Result<CommandResult, SshError> {
            Err(SshError::ExecutionFailed("Session is not connected".into()))
        }
    }

    fn status_cmd() -> RemoteCommand {
        RemoteCommand::new("pvesh get /nodes/pve1/qemu/101/status/current --output-format json")
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_first_match_and_stops_polling() {
        let runner = ScriptedRunner::new(&[
            r#"{"status":"running"}"#,
            r#"{"status":"running"}"#,
            r#"{"status":"stopped"}"#,
            r#"{"status":"running"}"#,
        ]);
        let monitor = OperationMonitor::new(
            &runner,
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::new(10, 30),
        );

        let outcome = monitor.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, MonitorOutcome::Completed { polls: 3 });
        assert_eq!(runner.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let runner = ScriptedRunner::new(&[r#"{"status":"running"}"#]);
        let monitor = OperationMonitor::new(
            &runner,
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::new(10, 3),
        );

        let start = Instant::now();
        let outcome = monitor.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, MonitorOutcome::TimedOut { polls: 3 });
        assert_eq!(runner.polls(), 3);

        let calls = runner.calls.lock().clone();
        for pair in calls.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(10));
        }
        // No wait after the final poll
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let runner = ScriptedRunner::new(&[r#"{"status":"running"}"#]);
        let monitor = OperationMonitor::new(
            &runner,
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::new(10, 30),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = monitor.run(&cancel).await.unwrap();

        assert_eq!(outcome, MonitorOutcome::Cancelled { polls: 2 });
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_poll() {
        let runner = ScriptedRunner::new(&[r#"{"status":"stopped"}"#]);
        let monitor = OperationMonitor::new(
            &runner,
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = monitor.run(&cancel).await.unwrap();
        assert_eq!(outcome, MonitorOutcome::Cancelled { polls: 0 });
        assert_eq!(runner.polls(), 0);
    }

    #[tokio::test]
    async fn test_execution_error_ends_monitoring() {
        let monitor = OperationMonitor::new(
            &FailingRunner,
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::default(),
        );
        let result = monitor.run(&CancellationToken::new()).await;
        assert!(matches!(result, Err(SshError::ExecutionFailed(_))));
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let runner = ScriptedRunner::new(&[]);
        let monitor = OperationMonitor::new(
            &runner,
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::new(10, 0),
        );
        let result = monitor.run(&CancellationToken::new()).await;
        assert!(matches!(result, Err(SshError::Config(_))));
        assert_eq!(runner.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_events_emitted() {
        let runner = Arc::new(ScriptedRunner::new(&["running", "running", "not found"]));
        let (emitter, mut rx) = RunEventEmitter::channel();
        let monitor = OperationMonitor::new(
            runner.as_ref(),
            status_cmd(),
            SubstringPredicate::default(),
            MonitorConfig::new(1, 5),
        )
        .with_emitter(emitter);

        let outcome = monitor.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.polls(), 3);
        drop(monitor);

        let mut attempts = Vec::new();
        while let Some(event) = rx.recv().await {
            if let RunEvent::Poll { attempt, .. } = event {
                attempts.push(attempt);
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);
    }
}
