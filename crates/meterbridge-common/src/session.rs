//! Billing/session collaborator interface
//!
//! The session controller owns channels and billing; meterbridge only
//! consumes it through this trait. Wire format and ledger semantics belong
//! to the implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Channel, ConnChange, Endpoint, ProductConfig};

/// Ordered stream of connection changes
///
/// An `Err` item means the subscription itself failed.
pub type ConnChangeStream = BoxStream<'static, Result<ConnChange>>;

/// Handle returned when a billing session is opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
}

/// Billing/session controller operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Subscribe to connection changes of this product
    async fn subscribe_conn_changes(&self) -> Result<ConnChangeStream>;

    /// Resolve endpoint metadata of a channel
    async fn get_endpoint(&self, channel: &Channel) -> Result<Endpoint>;

    /// Open a billing session for a channel
    async fn start_session(&self, id: &str, channel: &Channel, units: u64) -> Result<SessionHandle>;

    /// Report cumulative usage of a channel
    async fn update_session(&self, channel: &Channel, usage: u64, last: bool) -> Result<()>;

    /// Terminate the billing session of a channel
    async fn stop_session(&self, channel: &Channel) -> Result<()>;

    /// Publish product configuration
    async fn set_product_config(&self, config: &ProductConfig) -> Result<()>;
}
