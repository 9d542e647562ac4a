//! Error types for gateway operations
//!
//! This module covers every failure the gateway reports: unknown nodes,
//! values and scenes, malformed topics, bus and driver transport failures and
//! persistence problems.

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Registry Errors =====
    /// Node is not in the registry
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Value is not in the registry
    #[error("Value not found: {0}")]
    ValueNotFound(String),

    /// Device template is not in the registry
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Scene does not exist
    #[error("Scene not found: {0}")]
    SceneNotFound(u32),

    // ===== Protocol Errors =====
    /// Topic does not follow the topic grammar
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Value identifier could not be parsed
    #[error("Invalid value id: {0}")]
    InvalidValueId(String),

    /// API call arguments do not match the operation
    #[error("Invalid arguments for {api}: {reason}")]
    InvalidArguments {
        /// Operation name
        api: String,
        /// What was wrong
        reason: String,
    },

    // ===== Transport Errors =====
    /// Message bus failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Mesh driver failure
    #[error("Driver error: {0}")]
    Driver(String),

    /// Mesh driver is not connected
    #[error("Zwave client not connected")]
    DriverNotConnected,

    /// Connection attempts exhausted
    #[error("Connection to {address} failed after {attempts} attempts")]
    ConnectFailed {
        /// Target address
        address: String,
        /// Attempts made
        attempts: u32,
    },

    /// Driver did not answer in time
    #[error("Timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    // ===== Persistence Errors =====
    /// Document store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== General Errors =====
    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_)
                | GatewayError::Driver(_)
                | GatewayError::DriverNotConnected
                | GatewayError::Timeout { .. }
                | GatewayError::Io(_)
        )
    }

    /// Check if this error means an identifier did not resolve
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GatewayError::NodeNotFound(_)
                | GatewayError::ValueNotFound(_)
                | GatewayError::DeviceNotFound(_)
                | GatewayError::SceneNotFound(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::NodeNotFound(_) => "NODE_NOT_FOUND",
            GatewayError::ValueNotFound(_) => "VALUE_NOT_FOUND",
            GatewayError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            GatewayError::SceneNotFound(_) => "SCENE_NOT_FOUND",
            GatewayError::InvalidTopic(_) => "INVALID_TOPIC",
            GatewayError::InvalidValueId(_) => "INVALID_VALUE_ID",
            GatewayError::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            GatewayError::Transport(_) => "TRANSPORT_ERROR",
            GatewayError::Driver(_) => "DRIVER_ERROR",
            GatewayError::DriverNotConnected => "DRIVER_NOT_CONNECTED",
            GatewayError::ConnectFailed { .. } => "CONNECT_FAILED",
            GatewayError::Timeout { .. } => "TIMEOUT",
            GatewayError::Persistence(_) => "PERSISTENCE_ERROR",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::ChannelError(_) => "CHANNEL_ERROR",
            GatewayError::ChannelClosed => "CHANNEL_CLOSED",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }

    pub(crate) fn invalid_args(api: &str, reason: impl Into<String>) -> Self {
        GatewayError::InvalidArguments {
            api: api.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<zwave_core::CoreError> for GatewayError {
    fn from(err: zwave_core::CoreError) -> Self {
        GatewayError::InvalidValueId(err.to_string())
    }
}

impl From<zwave_state::StateError> for GatewayError {
    fn from(err: zwave_state::StateError) -> Self {
        GatewayError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

#[cfg(feature = "mqtt")]
impl From<rumqttc::ClientError> for GatewayError {
    fn from(err: rumqttc::ClientError) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

// Conversion from tokio mpsc send error
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GatewayError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GatewayError::ChannelError(err.to_string())
    }
}
