//! Error types for the domain model
//!
//! Parsing of the textual identifiers used on the wire (value ids, device
//! ids) is the only fallible operation at this layer.

use thiserror::Error;

/// Errors produced while parsing or validating domain identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value identifier did not have the `[node-]class-instance-index` shape
    #[error("Invalid value id: {0}")]
    InvalidValueId(String),

    /// A device template identifier did not have the `manufacturer-product-type` shape
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    /// A manufacturer/product identifier could not be read as a number
    #[error("Invalid numeric identifier: {0}")]
    InvalidNumericId(String),
}

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidValueId("37-x".to_string());
        assert_eq!(err.to_string(), "Invalid value id: 37-x");
    }
}
