//! SSH Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    /// Missing, ambiguous or invalid configuration. Raised before any network I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Host unreachable, resolution failure or handshake failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Forwarding failed: {0}")]
    ForwardingFailed(String),

    /// The session cannot run commands (disconnected, channel refused)
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),
}

impl SshError {
    /// Errors raised while establishing the session. These abort a run and are never retried.
    pub fn is_connection_stage(&self) -> bool {
        matches!(
            self,
            SshError::AuthenticationFailed(_)
                | SshError::ConnectionFailed(_)
                | SshError::Timeout(_)
        )
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::Config(format!("Invalid private key: {}", err))
    }
}

impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_stage_classification() {
        assert!(SshError::AuthenticationFailed("denied".into()).is_connection_stage());
        assert!(SshError::Timeout("handshake".into()).is_connection_stage());
        assert!(!SshError::BindFailed("in use".into()).is_connection_stage());
        assert!(!SshError::Config("no credential".into()).is_connection_stage());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let json = serde_json::to_string(&SshError::Disconnected).unwrap();
        assert_eq!(json, "\"Disconnected\"");
    }
}
