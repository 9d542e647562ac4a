//! Mesh driver implementations
//!
//! The gateway never talks to the radio itself. It consumes a stream of
//! [`MeshEvent`]s from a driver and hands [`MeshCommand`]s back to it:
//!
//! - [`tcp::TcpDriver`] - newline-delimited JSON over TCP to a driver daemon
//!   (requires `tcp` feature)
//!
//! Test doubles live in [`crate::test_utils`].

#[cfg(feature = "tcp")]
mod tcp;
#[cfg(feature = "tcp")]
pub use tcp::TcpDriver;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value as Json;
use zwave_core::{MeshCommand, MeshEvent};

/// Trait for mesh driver connections
///
/// This trait abstracts over the way the gateway reaches the driver,
/// providing a unified API for events, commands and named operations.
#[async_trait]
pub trait MeshDriver: Send {
    /// Connect to the driver
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the driver
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Wait for the next driver notification
    ///
    /// Must be cancel-safe. Returns `None` once when the event stream ends;
    /// afterwards, and while not connected, the future never resolves.
    async fn next_event(&mut self) -> Option<MeshEvent>;

    /// Send a command to the driver
    async fn send(&mut self, command: MeshCommand) -> Result<()>;

    /// Invoke a named driver operation
    async fn call(&mut self, api: &str, args: Vec<Json>) -> Result<Json>;

    /// Get the driver name (for logging)
    fn name(&self) -> &str;
}

/// Connection state for drivers and the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Successfully connected
    Connected,
    /// Connection lost, may reconnect
    Reconnecting,
    /// Shut down on request, will not reconnect
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
