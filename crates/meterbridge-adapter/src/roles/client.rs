//! Client role - consuming side, one active session at a time
//!
//! The active channel is persisted before metering starts so that a crash
//! between start and stop is repaired on the next startup: the stale
//! billing session is stopped and the record cleared before any new
//! connection change is consumed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use meterbridge_common::{
    BridgeError, Channel, Endpoint, MeteringKey, ProxyUsageGetter, Result, RouteRequest,
};

use super::{stop_metering, Role};
use crate::config::RoleKind;
use crate::context::AdapterContext;
use crate::store::ActiveChannelStore;

pub struct ClientRole {
    store: ActiveChannelStore,
    inbound_tag: String,
    /// Validated routes of created channels awaiting start
    ///
    /// An entry leaves on the channel's Start or Stop. A channel the
    /// controller creates and then abandons keeps its entry until restart.
    pending: HashMap<Channel, RouteRequest>,
    active: Option<Channel>,
}

impl ClientRole {
    pub fn new(store: ActiveChannelStore, inbound_tag: String) -> Self {
        Self {
            store,
            inbound_tag,
            pending: HashMap::new(),
            active: None,
        }
    }

    fn metering_key(&self) -> MeteringKey {
        MeteringKey::Inbound(self.inbound_tag.clone())
    }

    /// Stop the billing session left behind by a previous run
    pub async fn recover(&self, ctx: &AdapterContext) -> Result<()> {
        let Some(channel) = self.store.load().await? else {
            debug!("No active channel to recover");
            return Ok(());
        };

        warn!(channel = %channel, "Recovering channel left active by previous run");
        ctx.session.stop_session(&channel).await?;
        self.store.remove().await?;
        info!(channel = %channel, "Stale session stopped");
        Ok(())
    }
}

#[async_trait]
impl Role for ClientRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Client
    }

    async fn prepare(&mut self, ctx: &AdapterContext) -> Result<()> {
        self.recover(ctx).await
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn provision(
        &mut self,
        _ctx: &AdapterContext,
        channel: &Channel,
        endpoint: &Endpoint,
        identity: &str,
    ) -> Result<()> {
        let route = RouteRequest::from_params(identity, &endpoint.additional_params)?;
        debug!(address = %route.address, port = route.port, "Route request validated");
        self.pending.insert(channel.clone(), route);
        Ok(())
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn activate(&mut self, ctx: &AdapterContext, channel: &Channel, _identity: &str) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(BridgeError::Internal(format!(
                "channel {} started while {} is still active",
                channel, active
            )));
        }
        let route = self.pending.remove(channel).ok_or_else(|| {
            BridgeError::Internal(format!("no route prepared for channel {}", channel))
        })?;

        info!(address = %route.address, port = route.port, "Configuring proxy to connect");
        ctx.proxy.configure_route(&route).await?;

        info!("Requesting traffic counter reset");
        let key = self.metering_key();
        ctx.proxy.request_counter_reset(&key).await?;

        self.store.store(channel).await?;
        self.active = Some(channel.clone());

        ctx.monitor
            .start(channel.clone(), Arc::new(ProxyUsageGetter::new(ctx.proxy.clone(), key)));
        Ok(())
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn deactivate(&mut self, ctx: &AdapterContext, channel: &Channel, _identity: &str) -> Result<()> {
        info!("Removing proxy configuration to connect");
        ctx.proxy.remove_route().await?;
        stop_metering(ctx, channel).await;
        self.store.remove().await?;
        self.active = None;
        ctx.session.stop_session(channel).await
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn deprovision(&mut self, ctx: &AdapterContext, channel: &Channel, _identity: &str) -> Result<()> {
        self.pending.remove(channel);
        info!("Channel stopped before start, dropping prepared route");
        ctx.session.stop_session(channel).await
    }
}
