//! Adapter wiring and the top-level run loop

use std::future::Future;
use std::sync::Arc;

use prometheus::Registry;
use tracing::{error, info};

use meterbridge_common::{BridgeError, Result};
use meterbridge_metering::{MeteringMetrics, ReportDispatcher, ReportReceiver, UsageMonitor};

use crate::config::AdapterConfig;
use crate::context::AdapterContext;
use crate::event_loop::ConnectionEventLoop;
use crate::nats::NatsSessionClient;
use crate::roles::{self, Role};
use crate::telemetry;
use crate::v2ray::V2RayClient;

/// Build every component from `config` and run until a fatal error or ctrl-c
pub async fn run(config: AdapterConfig) -> anyhow::Result<()> {
    info!(
        version = meterbridge_common::VERSION,
        role = %config.role(),
        "Starting proxy adapter"
    );

    let metrics = Arc::new(MeteringMetrics::new()?);
    let registry = Registry::new();
    metrics.register(&registry)?;
    if let Some(addr) = config.metrics.listen {
        telemetry::spawn_metrics_server(addr, registry).await?;
    }

    let session = Arc::new(NatsSessionClient::connect(&config.session).await?);
    let proxy = Arc::new(V2RayClient::connect_lazy(&config.proxy)?);
    let (monitor, reports) = UsageMonitor::new(config.monitor.period(), metrics.clone());

    let ctx = AdapterContext::new(session, proxy, Arc::new(monitor), metrics);
    let role = roles::from_config(&config);

    serve(ctx, role, reports, shutdown_signal()).await?;
    Ok(())
}

/// Run the event loop and the report dispatcher until one fails or
/// `shutdown` resolves
///
/// Subscribes before role preparation so no change published during
/// recovery is lost. Shutdown leaves active channels as they are; the
/// client role repairs them on the next start.
pub async fn serve<F>(
    ctx: AdapterContext,
    role: Box<dyn Role>,
    reports: ReportReceiver,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let changes = ctx.session.subscribe_conn_changes().await?;

    let mut event_loop = ConnectionEventLoop::new(ctx.clone(), role);
    event_loop.prepare().await?;

    let dispatcher = ReportDispatcher::new(ctx.session.clone(), ctx.metrics.clone());
    let mut dispatch = tokio::spawn(async move { dispatcher.run(reports).await });

    let result = tokio::select! {
        res = event_loop.run(changes) => res,
        res = &mut dispatch => match res {
            Ok(Ok(())) => Err(BridgeError::ReportChannelClosed),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(BridgeError::Internal(format!("report dispatcher panicked: {}", e))),
        },
        _ = shutdown => {
            info!("Shutdown requested, leaving active channels in place");
            Ok(())
        }
    };

    dispatch.abort();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
