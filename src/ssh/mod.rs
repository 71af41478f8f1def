//! SSH module - handles SSH connections using the russh library.
//!
//! # Features
//! - Password and private-key authentication
//! - Optional host key pinning by SHA256 fingerprint
//! - Single-owner handle task shared by exec channels and port forwards

mod client;
mod config;
mod error;
mod handle_owner;
mod session;

pub use client::{fingerprint, ClientHandler, SshClient, SshConnector};
pub use config::{AuthMethod, Credentials, SshConfig};
pub use error::SshError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use session::SshSession;
