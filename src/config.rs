//! Run configuration
//!
//! Everything one orchestrator run needs, with the defaults of the CLI.
//! Can be deserialized from a JSON file and then overridden from flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::forwarding::ForwardingSpec;
use crate::migration::MigrationTarget;
use crate::monitor::{default_indicators, MonitorConfig, SubstringPredicate};
use crate::ssh::{Credentials, SshConfig, SshError};

pub const DEFAULT_LOCAL_PORT: u16 = 22222;
pub const DEFAULT_REMOTE_PORT: u16 = 22;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Host the SSH session is opened to (migration source)
    pub source_host: String,

    /// Host the local forward points at (migration destination)
    pub destination_host: String,

    pub username: String,

    #[serde(default)]
    pub credentials: Credentials,

    /// Local port of the forward (default: 22222)
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    /// SSH port on the source, and forward target port on the destination (default: 22)
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    pub target: MigrationTarget,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Status substrings that mean the migration is done
    #[serde(default = "default_indicators")]
    pub completion_indicators: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_fingerprint: Option<String>,

    /// Keep the tunnel open after monitoring until the run is cancelled
    #[serde(default)]
    pub hold_tunnel: bool,
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

impl RunConfig {
    pub fn new(
        source_host: impl Into<String>,
        destination_host: impl Into<String>,
        username: impl Into<String>,
        credentials: Credentials,
        target: MigrationTarget,
    ) -> Self {
        Self {
            source_host: source_host.into(),
            destination_host: destination_host.into(),
            username: username.into(),
            credentials,
            local_port: DEFAULT_LOCAL_PORT,
            remote_port: DEFAULT_REMOTE_PORT,
            bind_address: default_bind_address(),
            target,
            monitor: MonitorConfig::default(),
            completion_indicators: default_indicators(),
            connect_timeout_secs: default_connect_timeout(),
            host_fingerprint: None,
            hold_tunnel: false,
        }
    }

    /// Load a configuration file (JSON)
    pub fn load(path: &Path) -> Result<Self, SshError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SshError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            SshError::Config(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    /// Connection parameters for the source host. Fails on missing or ambiguous credentials.
    pub fn ssh_config(&self) -> Result<SshConfig, SshError> {
        if self.source_host.trim().is_empty() {
            return Err(SshError::Config("Source host is required".into()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::Config("Username is required".into()));
        }
        if self.remote_port == 0 {
            return Err(SshError::Config("Remote port must be between 1 and 65535".into()));
        }

        Ok(SshConfig {
            host: self.source_host.clone(),
            port: self.remote_port,
            username: self.username.clone(),
            auth: self.credentials.to_auth_method()?,
            timeout_secs: self.connect_timeout_secs,
            host_fingerprint: self.host_fingerprint.clone(),
        })
    }

    pub fn forwarding_spec(&self) -> ForwardingSpec {
        ForwardingSpec::new(self.local_port, self.destination_host.clone(), self.remote_port)
            .with_bind_address(self.bind_address.clone())
    }

    pub fn predicate(&self) -> SubstringPredicate {
        SubstringPredicate::new(self.completion_indicators.iter().cloned())
    }

    /// Check everything that can be checked without the network
    pub fn validate(&self) -> Result<SshConfig, SshError> {
        let ssh_config = self.ssh_config()?;
        self.forwarding_spec().validate()?;
        self.target.validate()?;
        self.monitor.validate()?;
        Ok(ssh_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunConfig {
        RunConfig::new(
            "10.0.0.1",
            "10.0.0.2",
            "root",
            Credentials::with_key_file("/root/.ssh/id_ed25519"),
            MigrationTarget::new(101, "pve1", "pve2"),
        )
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        assert_eq!(config.local_port, 22222);
        assert_eq!(config.remote_port, 22);
        assert_eq!(config.monitor, MonitorConfig::new(10, 30));
        assert!(!config.hold_tunnel);

        let spec = config.forwarding_spec();
        assert_eq!(spec.local_addr(), "127.0.0.1:22222");
        assert_eq!(spec.destination_host, "10.0.0.2");
        assert_eq!(spec.destination_port, 22);

        let ssh = config.validate().unwrap();
        assert_eq!(ssh.host, "10.0.0.1");
        assert_eq!(ssh.port, 22);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = sample();
        config.credentials = Credentials::default();
        assert!(matches!(config.validate(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let raw = r#"{
            "source_host": "10.0.0.1",
            "destination_host": "10.0.0.2",
            "username": "root",
            "credentials": { "password": "pw" },
            "target": { "vmid": 101, "source_node": "pve1", "destination_node": "pve2" },
            "monitor": { "max_attempts": 5 }
        }"#;
        let config: RunConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.local_port, 22222);
        assert_eq!(config.monitor.max_attempts, 5);
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.completion_indicators, default_indicators());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_omits_password() {
        let mut config = sample();
        config.credentials = Credentials::with_password("hunter2");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
