//! Remote command execution over SSH exec channels

use std::fmt;

use async_trait::async_trait;
use russh::ChannelMsg;
use serde::Serialize;
use tracing::debug;

use crate::ssh::{HandleController, SshError};
use crate::transport::CommandRunner;

/// Placeholder rendered in place of secret fragments
pub const REDACTED: &str = "***";

/// A command string to be run remotely.
///
/// Secret fragments registered with [`RemoteCommand::with_secret`] only ever
/// leave the process inside the encrypted channel. `Display` and `Debug` both
/// render the command with every secret replaced by `***`.
#[derive(Clone)]
pub struct RemoteCommand {
    command: String,
    secrets: Vec<String>,
}

impl RemoteCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            secrets: Vec::new(),
        }
    }

    /// Mark `secret` as sensitive. Empty strings are ignored.
    ///
    /// The form the secret takes inside [`shell_escape`] quoting is covered too.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.is_empty() {
            return self;
        }
        let quoted = escape_quotes(&secret);
        if quoted != secret {
            self.secrets.push(quoted);
        }
        self.secrets.push(secret);
        self
    }

    /// The raw command, secrets included. Only for sending over the channel.
    pub fn as_str(&self) -> &str {
        &self.command
    }

    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }

    /// The command with all secrets replaced
    pub fn redacted(&self) -> String {
        self.secrets
            .iter()
            .fold(self.command.clone(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteCommand").field(&self.redacted()).finish()
    }
}

/// Outcome of one remote execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// `None` when the remote process ended without reporting a status (e.g. killed by a signal)
    pub exit_status: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_status: u32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status: Some(exit_status),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// stdout followed by stderr, the text a status predicate looks at
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run a command on a fresh session channel and collect its output
pub async fn execute_command(
    controller: &HandleController,
    command: &RemoteCommand,
) -> Result<CommandResult, SshError> {
    if !controller.is_connected() {
        return Err(SshError::ExecutionFailed("Session is not connected".to_string()));
    }

    let mut channel = controller.open_session_channel().await.map_err(|e| match e {
        SshError::Disconnected => SshError::ExecutionFailed("Session is not connected".to_string()),
        other => other,
    })?;

    debug!("Remote exec: {}", command);

    channel
        .exec(true, command.as_str())
        .await
        .map_err(|e| SshError::ExecutionFailed(format!("Failed to execute command: {}", e)))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status: Option<u32> = None;

    // exit-status usually arrives after EOF, so only Close ends the loop
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                stderr.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                exit_status = Some(status);
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    let result = CommandResult {
        exit_status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };

    debug!(
        "Remote exec completed: exit={:?} stdout_len={} stderr_len={}",
        result.exit_status,
        result.stdout.len(),
        result.stderr.len()
    );

    Ok(result)
}

#[async_trait]
impl CommandRunner for HandleController {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandResult, SshError> {
        execute_command(self, command).await
    }
}

/// Quote a value for a POSIX shell
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", escape_quotes(s))
}

fn escape_quotes(s: &str) -> String {
    s.replace('\'', "'\\''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_secret_never_rendered() {
        let cmd = RemoteCommand::new("curl -H 'Authorization: PVEAPIToken=root@pam!ops=s3cr3t' x")
            .with_secret("s3cr3t");
        assert!(cmd.has_secrets());
        assert!(cmd.as_str().contains("s3cr3t"));
        assert!(!cmd.to_string().contains("s3cr3t"));
        assert!(!format!("{:?}", cmd).contains("s3cr3t"));
        assert!(cmd.to_string().contains("PVEAPIToken=root@pam!ops=***"));
    }

    #[test]
    fn test_quoted_secret_never_rendered() {
        let secret = "ab'cd-secret";
        let cmd = RemoteCommand::new(format!(
            "curl -H {} x",
            shell_escape(&format!("Authorization: PVEAPIToken=root@pam!ops={}", secret))
        ))
        .with_secret(secret);

        assert!(cmd.as_str().contains("ab'\\''cd-secret"));
        let rendered = cmd.to_string();
        assert!(!rendered.contains("cd-secret"));
        assert!(!format!("{:?}", cmd).contains("cd-secret"));
        assert_eq!(rendered, "curl -H 'Authorization: PVEAPIToken=root@pam!ops=***' x");
    }

    #[test]
    fn test_empty_secret_ignored() {
        let cmd = RemoteCommand::new("qm list").with_secret("");
        assert!(!cmd.has_secrets());
        assert_eq!(cmd.to_string(), "qm list");
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(CommandResult::new(0, "a", "").combined_output(), "a");
        assert_eq!(CommandResult::new(2, "", "b").combined_output(), "b");
        assert_eq!(CommandResult::new(2, "a", "b").combined_output(), "a\nb");
    }

    #[test]
    fn test_success_requires_zero_status() {
        assert!(CommandResult::new(0, "", "").is_success());
        assert!(!CommandResult::new(1, "", "").is_success());
        let killed = CommandResult {
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!killed.is_success());
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("pve2"), "'pve2'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }

    #[tokio::test]
    async fn test_execute_on_closed_session_fails() {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        drop(cmd_rx);
        let controller = HandleController::new(cmd_tx);

        let result = controller.execute(&RemoteCommand::new("true")).await;
        assert!(matches!(result, Err(SshError::ExecutionFailed(_))));
    }
}
