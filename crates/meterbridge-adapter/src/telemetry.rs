//! Telemetry - logging setup and the Prometheus metrics endpoint

use std::net::SocketAddr;

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;

/// File name prefix of the daily rolling log
pub const LOG_FILE_NAME: &str = "meterbridge.log";

/// Initialize tracing
///
/// `RUST_LOG` overrides the configured filter. With `log.dir` set, a daily
/// rolling file layer is added; keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init_tracing(settings: &LogSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Render all metrics of `registry` in the text exposition format
pub fn render_metrics(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        warn!(error = %e, "Could not encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        render_metrics(&registry),
    )
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Bind `addr` and serve `/metrics` in the background
pub async fn spawn_metrics_server(addr: SocketAddr, registry: Registry) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("Metrics endpoint listening on {}", local);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_router(registry)).await {
            warn!(error = %e, "Metrics endpoint stopped");
        }
    });

    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[test]
    fn test_render_metrics() {
        let registry = Registry::new();
        let counter = IntCounter::new("meterbridge_test_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let text = render_metrics(&registry);
        assert!(text.contains("meterbridge_test_total 3"));
    }

    #[tokio::test]
    async fn test_metrics_server_binds_ephemeral_port() {
        let addr = spawn_metrics_server("127.0.0.1:0".parse().unwrap(), Registry::new())
            .await
            .unwrap();
        assert_ne!(addr.port(), 0);
    }
}
