//! SSH Configuration

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::error::SshError;

/// SSH connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method
    pub auth: AuthMethod,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Pinned host key fingerprint (`SHA256:...`).
    /// When set, a server presenting any other key is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_fingerprint: Option<String>,
}

/// Authentication methods supported
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file
        key_path: PathBuf,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self::Key {
            key_path: key_path.into(),
            passphrase,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f.write_str("Password { .. }"),
            AuthMethod::Key { key_path, .. } => {
                f.debug_struct("Key").field("key_path", key_path).finish()
            }
        }
    }
}

/// Raw credential input as supplied by the operator.
///
/// Exactly one form must be present and non-empty; [`Credentials::to_auth_method`]
/// enforces this before anything touches the network.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing)]
    pub password: Option<Zeroizing<String>>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default, skip_serializing)]
    pub passphrase: Option<Zeroizing<String>>,
}

impl Credentials {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(Zeroizing::new(password.into())),
            ..Default::default()
        }
    }

    pub fn with_key_file(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: Some(key_path.into()),
            ..Default::default()
        }
    }

    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    /// Validate and convert into an [`AuthMethod`]
    pub fn to_auth_method(&self) -> Result<AuthMethod, SshError> {
        let password = self.password.as_ref().filter(|p| !p.is_empty());
        let key_path = self
            .key_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty());

        match (password, key_path) {
            (Some(password), None) => Ok(AuthMethod::password(password.as_str())),
            (None, Some(key_path)) => Ok(AuthMethod::key(
                key_path.clone(),
                self.passphrase
                    .as_ref()
                    .filter(|p| !p.is_empty())
                    .map(|p| p.as_str().to_owned()),
            )),
            (None, None) => Err(SshError::Config(
                "No credential supplied: provide either a password or a private key file".into(),
            )),
            (Some(_), Some(_)) => Err(SshError::Config(
                "Ambiguous credentials: provide either a password or a private key file, not both"
                    .into(),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("has_password", &self.password.is_some())
            .field("key_path", &self.key_path)
            .finish()
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    30
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: AuthMethod::Password {
                password: String::new(),
            },
            timeout_secs: 30,
            host_fingerprint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_only() {
        let auth = Credentials::with_password("secret").to_auth_method().unwrap();
        assert!(matches!(auth, AuthMethod::Password { ref password } if password == "secret"));
    }

    #[test]
    fn test_key_only_keeps_passphrase() {
        let auth = Credentials::with_key_file("/home/op/.ssh/id_ed25519")
            .passphrase("pp")
            .to_auth_method()
            .unwrap();
        match auth {
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                assert_eq!(key_path, PathBuf::from("/home/op/.ssh/id_ed25519"));
                assert_eq!(passphrase.as_deref(), Some("pp"));
            }
            other => panic!("unexpected auth method: {:?}", other),
        }
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = Credentials::default().to_auth_method().unwrap_err();
        assert!(matches!(err, SshError::Config(_)));
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let creds = Credentials {
            password: Some(Zeroizing::new(String::new())),
            key_path: Some(PathBuf::new()),
            passphrase: None,
        };
        assert!(matches!(creds.to_auth_method(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_both_credentials_rejected() {
        let mut creds = Credentials::with_password("secret");
        creds.key_path = Some("/tmp/id_rsa".into());
        assert!(matches!(creds.to_auth_method(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", AuthMethod::password("hunter2"));
        assert!(!rendered.contains("hunter2"));
        let rendered = format!("{:?}", Credentials::with_password("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
