//! Agent role - serving side, many concurrent sessions

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use meterbridge_common::types::product::product_config;
use meterbridge_common::{Channel, Endpoint, MeteringKey, ProxyUsageGetter, Result};

use super::{stop_metering, Role};
use crate::config::RoleKind;
use crate::context::AdapterContext;
use crate::external_ip;
use crate::product;
use crate::store::ConfigPushedMarker;

pub struct AgentRole {
    marker: ConfigPushedMarker,
    external_address: Option<String>,
    inbound_port: u16,
    alter_id: u32,
}

impl AgentRole {
    pub fn new(
        marker: ConfigPushedMarker,
        external_address: Option<String>,
        inbound_port: u16,
        alter_id: u32,
    ) -> Self {
        Self {
            marker,
            external_address,
            inbound_port,
            alter_id,
        }
    }

    async fn address(&self) -> Result<String> {
        match &self.external_address {
            Some(address) => Ok(address.clone()),
            None => external_ip::lookup().await,
        }
    }
}

#[async_trait]
impl Role for AgentRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Agent
    }

    async fn prepare(&mut self, ctx: &AdapterContext) -> Result<()> {
        if self.marker.is_set().await? {
            return Ok(());
        }
        let config = product_config(&self.address().await?, self.inbound_port, self.alter_id);
        product::push_once(ctx.session.as_ref(), &self.marker, &config).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn provision(
        &mut self,
        ctx: &AdapterContext,
        channel: &Channel,
        _endpoint: &Endpoint,
        identity: &str,
    ) -> Result<()> {
        info!("Configuring proxy to accept connections");
        ctx.proxy.add_user(identity).await
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn activate(&mut self, ctx: &AdapterContext, channel: &Channel, identity: &str) -> Result<()> {
        let getter = ProxyUsageGetter::new(ctx.proxy.clone(), MeteringKey::User(identity.to_string()));
        ctx.monitor.start(channel.clone(), Arc::new(getter));
        Ok(())
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn deactivate(&mut self, ctx: &AdapterContext, channel: &Channel, identity: &str) -> Result<()> {
        info!("Configuring proxy to close connections");
        ctx.proxy.remove_user(identity).await?;
        stop_metering(ctx, channel).await;
        ctx.session.stop_session(channel).await
    }

    #[instrument(skip_all, fields(channel = %channel))]
    async fn deprovision(&mut self, ctx: &AdapterContext, channel: &Channel, identity: &str) -> Result<()> {
        info!("Channel stopped before start, removing user");
        ctx.proxy.remove_user(identity).await?;
        ctx.session.stop_session(channel).await
    }
}
