//! Error types for meterbridge
//!
//! Provides a unified error type and domain-specific error variants.
//! Whether an error is fatal is decided by the caller that observes it:
//! the event loop and the dispatcher propagate fatal errors with `?` and
//! handle recoverable ones in place.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Channel;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type for meterbridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    // Endpoint resolution errors
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    // Durable marker errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // Billing/session collaborator errors
    #[error("Session error: {0}")]
    Session(String),

    // Proxy-control collaborator errors
    #[error("Proxy control error: {0}")]
    Proxy(String),

    // Connection-change subscription failed
    #[error("Connection change subscription failed: {0}")]
    Subscription(String),

    // Connection-change subscription ended
    #[error("Connection change subscription ended unexpectedly")]
    SubscriptionClosed,

    // Report channel has no consumer left
    #[error("Report channel closed")]
    ReportChannelClosed,

    // Network/transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Endpoint metadata errors
///
/// All of these are fatal for the event loop: a channel that cannot be
/// identified must never be metered or billed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint of channel {channel} has no identity")]
    MissingIdentity { channel: Channel },

    #[error("endpoint parameter `{key}` is missing")]
    MissingParam { key: String },

    #[error("endpoint parameter `{key}` has invalid value `{value}`")]
    InvalidParam { key: String, value: String },

    #[error("endpoint parameters are malformed: {0}")]
    Malformed(String),
}

/// Active channel record errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record to remove at {}", path.display())]
    Missing { path: PathBuf },

    #[error("could not access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// Implement From for common external error types
impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Endpoint(EndpointError::MissingIdentity {
            channel: Channel::new("0xabc"),
        });
        assert!(err.to_string().contains("0xabc"));
    }

    #[test]
    fn test_store_error_names_path() {
        let err = StoreError::Missing {
            path: PathBuf::from("/var/lib/meterbridge/active"),
        };
        assert!(err.to_string().contains("/var/lib/meterbridge/active"));
    }
}
