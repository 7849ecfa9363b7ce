//! Role-specific reactions to connection lifecycle steps
//!
//! - [`AgentRole`]: serving side, adds and removes users on its inbound and
//!   meters each user separately
//! - [`ClientRole`]: consuming side, routes outbound traffic through one
//!   serving proxy at a time and owns the [`ActiveChannelStore`]
//!
//! [`ActiveChannelStore`]: crate::store::ActiveChannelStore

pub mod agent;
pub mod client;

pub use agent::AgentRole;
pub use client::ClientRole;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use meterbridge_common::{Channel, Endpoint, Result};

use crate::config::{AdapterConfig, RoleKind};
use crate::context::AdapterContext;
use crate::store::{ActiveChannelStore, ConfigPushedMarker};

/// Upper bound on waiting for billing to take a stopped channel's final usage
pub const FINAL_REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stop metering `channel` and wait until its final report was handled
///
/// The billing session must still be open when the final usage arrives, so
/// roles call this before `stop_session`.
pub(crate) async fn stop_metering(ctx: &AdapterContext, channel: &Channel) {
    let Some(final_report) = ctx.monitor.stop(channel) else {
        return;
    };
    if final_report.wait(FINAL_REPORT_TIMEOUT).await {
        debug!(channel = %channel, "Final usage handed to billing");
    } else {
        warn!(channel = %channel, "Final usage not confirmed by billing, stopping session anyway");
    }
}

/// Actions the event loop runs for state machine steps
///
/// Every error returned here is fatal for the adapter.
#[async_trait]
pub trait Role: Send {
    fn kind(&self) -> RoleKind;

    /// Runs once before any connection change is consumed
    async fn prepare(&mut self, ctx: &AdapterContext) -> Result<()>;

    /// Channel created
    async fn provision(
        &mut self,
        ctx: &AdapterContext,
        channel: &Channel,
        endpoint: &Endpoint,
        identity: &str,
    ) -> Result<()>;

    /// Channel started: apply configuration and start metering
    async fn activate(&mut self, ctx: &AdapterContext, channel: &Channel, identity: &str) -> Result<()>;

    /// Active channel stopped
    async fn deactivate(&mut self, ctx: &AdapterContext, channel: &Channel, identity: &str) -> Result<()>;

    /// Provisioned channel stopped before it ever started
    async fn deprovision(&mut self, ctx: &AdapterContext, channel: &Channel, identity: &str) -> Result<()>;
}

/// Build the role selected by `config`
pub fn from_config(config: &AdapterConfig) -> Box<dyn Role> {
    match config.role() {
        RoleKind::Agent => Box::new(AgentRole::new(
            ConfigPushedMarker::new(config.data_dir()),
            config.proxy.external_address.clone(),
            config.proxy.inbound_port,
            config.proxy.alter_id,
        )),
        RoleKind::Client => Box::new(ClientRole::new(
            ActiveChannelStore::new(config.data_dir()),
            config.proxy.inbound_tag.clone(),
        )),
    }
}
