//! Shared handles built once at startup

use std::sync::Arc;

use meterbridge_common::{ProxyControl, SessionClient};
use meterbridge_metering::{MeteringMetrics, UsageMonitor};

/// Collaborators and components shared by the event loop, the roles and
/// the report dispatcher
#[derive(Clone)]
pub struct AdapterContext {
    pub session: Arc<dyn SessionClient>,
    pub proxy: Arc<dyn ProxyControl>,
    pub monitor: Arc<UsageMonitor>,
    pub metrics: Arc<MeteringMetrics>,
}

impl AdapterContext {
    pub fn new(
        session: Arc<dyn SessionClient>,
        proxy: Arc<dyn ProxyControl>,
        monitor: Arc<UsageMonitor>,
        metrics: Arc<MeteringMetrics>,
    ) -> Self {
        Self {
            session,
            proxy,
            monitor,
            metrics,
        }
    }
}
