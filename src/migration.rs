//! Proxmox VE live-migration commands
//!
//! Builds the launch and status-query command strings for one VM. Without an
//! API token the node-local `pvesh` CLI is used; with a token the REST API on
//! the source node is called through `curl`, and the token secret is
//! registered as a redaction on the resulting [`RemoteCommand`].

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::exec::{shell_escape, RemoteCommand};
use crate::ssh::SshError;

/// API endpoint as seen from the source node itself
pub const DEFAULT_API_BASE: &str = "https://127.0.0.1:8006/api2/json";

/// Proxmox API token pair (`user@realm!tokenid`, secret)
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub token_id: String,
    #[serde(skip_serializing)]
    pub secret: Zeroizing<String>,
}

impl ApiToken {
    pub fn new(token_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    fn header_value(&self) -> String {
        format!("PVEAPIToken={}={}", self.token_id, self.secret.as_str())
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("token_id", &self.token_id)
            .field("secret", &"***")
            .finish()
    }
}

/// The VM to migrate and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTarget {
    pub vmid: u32,
    pub source_node: String,
    pub destination_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ApiToken>,
    /// Base URL of the API when a token is used
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl MigrationTarget {
    pub fn new(vmid: u32, source_node: impl Into<String>, destination_node: impl Into<String>) -> Self {
        Self {
            vmid,
            source_node: source_node.into(),
            destination_node: destination_node.into(),
            token: None,
            api_base: default_api_base(),
        }
    }

    pub fn with_token(mut self, token: ApiToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn validate(&self) -> Result<(), SshError> {
        if self.vmid == 0 {
            return Err(SshError::Config("VM id must be positive".into()));
        }
        if self.source_node.trim().is_empty() || self.destination_node.trim().is_empty() {
            return Err(SshError::Config("Source and destination node names are required".into()));
        }
        if let Some(token) = &self.token {
            if token.token_id.is_empty() || token.secret.is_empty() {
                return Err(SshError::Config(
                    "API token requires both a token id and a secret".into(),
                ));
            }
        }
        Ok(())
    }

    fn vm_path(&self) -> String {
        format!("/nodes/{}/qemu/{}", self.source_node, self.vmid)
    }

    /// Command that starts an online migration to the destination node
    pub fn launch_command(&self) -> RemoteCommand {
        match &self.token {
            None => RemoteCommand::new(format!(
                "pvesh create {} --target {} --online 1",
                shell_escape(&format!("{}/migrate", self.vm_path())),
                shell_escape(&self.destination_node)
            )),
            Some(token) => self.api_command(
                token,
                "POST",
                "migrate",
                &[
                    ("target", self.destination_node.as_str()),
                    ("online", "1"),
                ],
            ),
        }
    }

    /// Command that prints the VM's current status on the source node
    pub fn status_command(&self) -> RemoteCommand {
        match &self.token {
            None => RemoteCommand::new(format!(
                "pvesh get {} --output-format json",
                shell_escape(&format!("{}/status/current", self.vm_path()))
            )),
            Some(token) => self.api_command(token, "GET", "status/current", &[]),
        }
    }

    fn api_command(
        &self,
        token: &ApiToken,
        method: &str,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> RemoteCommand {
        let url = format!("{}{}/{}", self.api_base, self.vm_path(), endpoint);
        let mut command = format!(
            "curl -sk -X {} -H {}",
            method,
            shell_escape(&format!("Authorization: {}", token.header_value()))
        );
        for (key, value) in form {
            command.push_str(" --data-urlencode ");
            command.push_str(&shell_escape(&format!("{}={}", key, value)));
        }
        command.push(' ');
        command.push_str(&shell_escape(&url));

        RemoteCommand::new(command).with_secret(token.secret.as_str())
    }
}
