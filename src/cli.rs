//! Command-line interface
//!
//! Flags map onto [`RunConfig`]; a JSON config file may supply the base and
//! flags override it.

use std::fmt;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use zeroize::Zeroizing;

use crate::config::RunConfig;
use crate::migration::{ApiToken, MigrationTarget};
use crate::monitor::MonitorConfig;
use crate::ssh::{Credentials, SshError};

/// pve-tunnel - live-migrate a Proxmox VM through an SSH tunnel
#[derive(Parser)]
#[command(
    name = "pve-tunnel",
    version,
    about = "Live-migrate a Proxmox VE guest through an SSH tunnel and wait for completion"
)]
pub struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Source host (SSH session target)
    #[arg(short = 's', long = "source", value_name = "HOST")]
    pub source: Option<String>,

    /// Destination host (forward target)
    #[arg(short = 'd', long = "destination", value_name = "HOST")]
    pub destination: Option<String>,

    /// SSH username
    #[arg(short = 'u', long = "user", value_name = "NAME")]
    pub user: Option<String>,

    /// SSH password
    #[arg(long = "password", env = "PVE_TUNNEL_PASSWORD", hide_env_values = true, conflicts_with = "key_file")]
    pub password: Option<String>,

    /// Private key file
    #[arg(short = 'i', long = "key-file", value_name = "FILE")]
    pub key_file: Option<PathBuf>,

    /// Passphrase for an encrypted private key
    #[arg(long = "passphrase", env = "PVE_TUNNEL_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Local port of the forward [default: 22222]
    #[arg(short = 'L', long = "local-port")]
    pub local_port: Option<u16>,

    /// SSH port on both hosts [default: 22]
    #[arg(short = 'p', long = "remote-port")]
    pub remote_port: Option<u16>,

    /// Local bind address of the forward [default: 127.0.0.1]
    #[arg(long = "bind", value_name = "ADDR")]
    pub bind: Option<String>,

    /// VM id to migrate
    #[arg(long = "vmid")]
    pub vmid: Option<u32>,

    /// Proxmox node name of the source
    #[arg(long = "source-node", value_name = "NODE")]
    pub source_node: Option<String>,

    /// Proxmox node name of the destination
    #[arg(long = "dest-node", value_name = "NODE")]
    pub dest_node: Option<String>,

    /// API token id (user@realm!tokenid); switches commands to the REST API
    #[arg(long = "token-id", requires = "token_secret")]
    pub token_id: Option<String>,

    /// API token secret
    #[arg(long = "token-secret", env = "PVE_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,

    /// Seconds between status polls [default: 10]
    #[arg(long = "poll-interval", value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Maximum number of status polls [default: 30]
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<u32>,

    /// Status substring meaning "done" (repeatable, replaces the defaults)
    #[arg(long = "done-when", action = ArgAction::Append, value_name = "TEXT")]
    pub done_when: Vec<String>,

    /// SSH connect timeout in seconds [default: 30]
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Expected host key fingerprint of the source (SHA256:...)
    #[arg(long = "host-fingerprint", value_name = "FP")]
    pub host_fingerprint: Option<String>,

    /// Keep the tunnel open after monitoring until Ctrl-C
    #[arg(long = "hold")]
    pub hold: bool,

    /// Print events as JSON lines
    #[arg(long = "json")]
    pub json: bool,

    /// Increase verbosity (can be repeated: -v, -vv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

fn redact(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| crate::exec::REDACTED)
}

impl fmt::Debug for Cli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cli")
            .field("config", &self.config)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("key_file", &self.key_file)
            .field("passphrase", &redact(&self.passphrase))
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .field("bind", &self.bind)
            .field("vmid", &self.vmid)
            .field("source_node", &self.source_node)
            .field("dest_node", &self.dest_node)
            .field("token_id", &self.token_id)
            .field("token_secret", &redact(&self.token_secret))
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .field("done_when", &self.done_when)
            .field("timeout", &self.timeout)
            .field("host_fingerprint", &self.host_fingerprint)
            .field("hold", &self.hold)
            .field("json", &self.json)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Build the run configuration, loading the config file first if given
    pub fn into_config(self) -> Result<RunConfig, SshError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::new(
                required(self.source.clone(), "--source")?,
                required(self.destination.clone(), "--destination")?,
                required(self.user.clone(), "--user")?,
                Credentials::default(),
                MigrationTarget::new(
                    self.vmid
                        .ok_or_else(|| SshError::Config("Missing required argument --vmid".into()))?,
                    required(self.source_node.clone(), "--source-node")?,
                    required(self.dest_node.clone(), "--dest-node")?,
                ),
            ),
        };

        if let Some(source) = self.source {
            config.source_host = source;
        }
        if let Some(destination) = self.destination {
            config.destination_host = destination;
        }
        if let Some(user) = self.user {
            config.username = user;
        }
        if self.password.is_some() || self.key_file.is_some() {
            config.credentials = Credentials {
                password: self.password.map(Zeroizing::new),
                key_path: self.key_file,
                passphrase: self.passphrase.map(Zeroizing::new),
            };
        } else if let Some(passphrase) = self.passphrase {
            config.credentials.passphrase = Some(Zeroizing::new(passphrase));
        }

        config.local_port = self.local_port.unwrap_or(config.local_port);
        config.remote_port = self.remote_port.unwrap_or(config.remote_port);
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }

        if let Some(vmid) = self.vmid {
            config.target.vmid = vmid;
        }
        if let Some(node) = self.source_node {
            config.target.source_node = node;
        }
        if let Some(node) = self.dest_node {
            config.target.destination_node = node;
        }
        if let Some(token_id) = self.token_id {
            config.target.token = Some(ApiToken::new(
                token_id,
                self.token_secret.unwrap_or_default(),
            ));
        } else if let (Some(secret), Some(token)) =
            (self.token_secret, config.target.token.as_mut())
        {
            token.secret = Zeroizing::new(secret);
        }

        config.monitor = MonitorConfig::new(
            self.poll_interval.unwrap_or(config.monitor.poll_interval_secs),
            self.max_attempts.unwrap_or(config.monitor.max_attempts),
        );
        if !self.done_when.is_empty() {
            config.completion_indicators = self.done_when;
        }
        config.connect_timeout_secs = self.timeout.unwrap_or(config.connect_timeout_secs);
        if self.host_fingerprint.is_some() {
            config.host_fingerprint = self.host_fingerprint;
        }
        config.hold_tunnel |= self.hold;

        Ok(config)
    }
}

fn required(value: Option<String>, flag: &str) -> Result<String, SshError> {
    value.ok_or_else(|| SshError::Config(format!("Missing required argument {}", flag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::AuthMethod;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pve-tunnel").chain(args.iter().copied())).unwrap()
    }

    const BASE: &[&str] = &[
        "--source", "10.0.0.1", "--destination", "10.0.0.2", "--user", "root", "--vmid", "101",
        "--source-node", "pve1", "--dest-node", "pve2",
    ];

    #[test]
    fn test_key_file_scenario_defaults() {
        let mut args = BASE.to_vec();
        args.extend(["-i", "/root/.ssh/id_ed25519"]);
        let config = parse(&args).into_config().unwrap();

        assert_eq!(config.local_port, 22222);
        assert_eq!(config.remote_port, 22);
        assert_eq!(config.monitor, MonitorConfig::new(10, 30));
        assert_eq!(config.target.vmid, 101);
        let ssh = config.validate().unwrap();
        assert!(matches!(ssh.auth, AuthMethod::Key { .. }));
    }

    #[test]
    fn test_overrides() {
        let mut args = BASE.to_vec();
        args.extend([
            "--password", "pw", "-L", "2222", "--max-attempts", "3", "--poll-interval", "1",
            "--done-when", "migrated", "--hold",
        ]);
        let config = parse(&args).into_config().unwrap();
        assert_eq!(config.local_port, 2222);
        assert_eq!(config.monitor, MonitorConfig::new(1, 3));
        assert_eq!(config.completion_indicators, vec!["migrated".to_string()]);
        assert!(config.hold_tunnel);
    }

    #[test]
    fn test_password_and_key_conflict() {
        let mut args = vec!["pve-tunnel"];
        args.extend(BASE);
        args.extend(["--password", "pw", "-i", "/root/.ssh/id_rsa"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_missing_credentials_surface_at_validation() {
        let config = parse(BASE).into_config().unwrap();
        assert!(matches!(config.validate(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_missing_source_is_config_error() {
        let cli = parse(&["--user", "root"]);
        assert!(matches!(cli.into_config(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_token_pair() {
        let mut args = BASE.to_vec();
        args.extend(["-i", "/k", "--token-id", "root@pam!mig", "--token-secret", "s3cr3t-token"]);
        let config = parse(&args).into_config().unwrap();
        let token = config.target.token.as_ref().unwrap();
        assert_eq!(token.token_id, "root@pam!mig");
        assert!(!config.target.launch_command().to_string().contains("s3cr3t-token"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut args = BASE.to_vec();
        args.extend([
            "--password", "hunter2-pw", "--token-id", "root@pam!mig", "--token-secret", "s3cr3t-token",
        ]);
        let rendered = format!("{:?}", parse(&args));
        assert!(!rendered.contains("hunter2-pw"));
        assert!(!rendered.contains("s3cr3t-token"));
        assert!(rendered.contains("root@pam!mig"));
        assert!(rendered.contains("password: Some(\"***\")"));
    }
}
