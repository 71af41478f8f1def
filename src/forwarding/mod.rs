//! Port Forwarding Module
//!
//! Local (-L style) forwarding through an SSH session: the operator host binds
//! a port and every accepted connection is relayed to a host:port reachable
//! from the remote side.

mod local;

pub use local::{
    start_local_forward, start_local_forward_with_disconnect, ForwardStats, ForwardingSpec,
    LocalForwardHandle,
};
