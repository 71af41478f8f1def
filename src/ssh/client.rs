//! SSH Client implementation using russh

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PrivateKey, PublicKey};
use russh::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::session::SshSession;
use crate::transport::Connector;

/// SSH Client: turns an [`SshConfig`] into an authenticated [`SshSession`]
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect to the SSH server and return a session
    pub async fn connect(self) -> Result<SshSession, SshError> {
        // Key material is loaded before any network I/O so a bad key path is a config error
        let key = match &self.config.auth {
            AuthMethod::Key {
                key_path,
                passphrase,
            } => Some(
                russh::keys::load_secret_key(key_path, passphrase.as_deref()).map_err(|e| {
                    SshError::Config(format!(
                        "Failed to load private key {}: {}",
                        key_path.display(),
                        e
                    ))
                })?,
            ),
            AuthMethod::Password { .. } => None,
        };

        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.host_fingerprint.clone(),
        );

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
        .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed");

        let authenticated = match (&self.config.auth, key) {
            (AuthMethod::Password { password }, _) => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            (AuthMethod::Key { .. }, Some(key)) => {
                authenticate_with_key(&mut handle, &self.config.username, key).await?
            }
            (AuthMethod::Key { .. }, None) => {
                return Err(SshError::Config("Private key was not loaded".to_string()));
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(format!(
                "Authentication rejected by server for user {}",
                self.config.username
            )));
        }

        info!("SSH authentication successful for {}@{}", self.config.username, addr);

        let controller = spawn_handle_owner_task(handle, addr.clone());
        Ok(SshSession::new(controller, addr))
    }
}

async fn authenticate_with_key(
    handle: &mut client::Handle<ClientHandler>,
    username: &str,
    key: PrivateKey,
) -> Result<client::AuthResult, SshError> {
    let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

    handle
        .authenticate_publickey(username, key_with_hash)
        .await
        .map_err(|e| SshError::AuthenticationFailed(e.to_string()))
}

/// Production [`Connector`] backed by russh
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, config: &SshConfig) -> Result<SshSession, SshError> {
        SshClient::new(config.clone()).connect().await
    }
}

/// Compute the OpenSSH-style SHA256 fingerprint of a public key
pub fn fingerprint(key: &PublicKey) -> String {
    use russh::keys::PublicKeyBase64;

    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// Client handler for russh callbacks
///
/// Host keys are accepted and their fingerprint logged, unless a fingerprint is
/// pinned in which case only that key is accepted.
pub struct ClientHandler {
    host: String,
    port: u16,
    expected_fingerprint: Option<String>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, expected_fingerprint: Option<String>) -> Self {
        Self {
            host,
            port,
            expected_fingerprint,
        }
    }

    fn verify_fingerprint(&self, actual: &str) -> Result<bool, SshError> {
        match &self.expected_fingerprint {
            Some(expected) if expected.trim() != actual => {
                warn!(
                    "Host key mismatch for {}:{}: expected {}, got {}",
                    self.host, self.port, expected, actual
                );
                Err(SshError::ConnectionFailed(format!(
                    "Host key verification failed for {}:{}: expected {}, got {}",
                    self.host, self.port, expected, actual
                )))
            }
            Some(_) => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            None => {
                info!(
                    "Accepting host key for {}:{} (fingerprint: {})",
                    self.host, self.port, actual
                );
                Ok(true)
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = fingerprint(server_public_key);
        self.verify_fingerprint(&actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpinned_host_key_accepted() {
        let handler = ClientHandler::new("10.0.0.1".into(), 22, None);
        assert!(handler.verify_fingerprint("SHA256:abc").unwrap());
    }

    #[test]
    fn test_pinned_host_key_must_match() {
        let handler = ClientHandler::new("10.0.0.1".into(), 22, Some("SHA256:abc".into()));
        assert!(handler.verify_fingerprint("SHA256:abc").unwrap());
        assert!(matches!(
            handler.verify_fingerprint("SHA256:other"),
            Err(SshError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_file_is_config_error() {
        let config = SshConfig {
            host: "10.0.0.1".into(),
            username: "root".into(),
            auth: AuthMethod::key("/nonexistent/pve-tunnel/id_ed25519", None),
            ..Default::default()
        };
        let result = SshClient::new(config).connect().await;
        assert!(matches!(result, Err(SshError::Config(_))));
    }
}
