//! Prometheus metrics for metering and report dispatch

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use meterbridge_common::ReportKind;

/// Metering metrics shared by the monitor and the dispatcher
pub struct MeteringMetrics {
    pub reports_emitted: IntCounterVec,
    pub poll_failures: IntCounter,
    pub poll_failure_alerts: IntCounter,
    pub active_monitors: IntGauge,
    pub session_starts: IntCounter,
    pub session_updates: IntCounter,
    pub session_update_failures: IntCounter,
    pub reconciliation_gaps: IntCounter,
}

impl MeteringMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            reports_emitted: IntCounterVec::new(
                Opts::new("meterbridge_reports_emitted_total", "Usage reports emitted"),
                &["kind"],
            )?,
            poll_failures: IntCounter::new(
                "meterbridge_usage_poll_failures_total",
                "Usage polls that failed and were reported as zero",
            )?,
            poll_failure_alerts: IntCounter::new(
                "meterbridge_usage_poll_failure_alerts_total",
                "Polls that failed after the consecutive failure threshold",
            )?,
            active_monitors: IntGauge::new(
                "meterbridge_active_monitors",
                "Channels currently monitored",
            )?,
            session_starts: IntCounter::new(
                "meterbridge_session_starts_total",
                "Billing sessions opened",
            )?,
            session_updates: IntCounter::new(
                "meterbridge_session_updates_total",
                "Usage updates accepted by the billing controller",
            )?,
            session_update_failures: IntCounter::new(
                "meterbridge_session_update_failures_total",
                "Usage updates rejected, resent on the next tick",
            )?,
            reconciliation_gaps: IntCounter::new(
                "meterbridge_reconciliation_gaps_total",
                "Final usage updates that could not be delivered",
            )?,
        })
    }

    /// Register all collectors with a registry
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.reports_emitted.clone()))?;
        registry.register(Box::new(self.poll_failures.clone()))?;
        registry.register(Box::new(self.poll_failure_alerts.clone()))?;
        registry.register(Box::new(self.active_monitors.clone()))?;
        registry.register(Box::new(self.session_starts.clone()))?;
        registry.register(Box::new(self.session_updates.clone()))?;
        registry.register(Box::new(self.session_update_failures.clone()))?;
        registry.register(Box::new(self.reconciliation_gaps.clone()))?;
        Ok(())
    }

    pub fn record_report(&self, kind: ReportKind) {
        self.reports_emitted.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn reports(&self, kind: ReportKind) -> u64 {
        self.reports_emitted.with_label_values(&[kind.as_str()]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        let metrics = MeteringMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.record_report(ReportKind::First);
        metrics.record_report(ReportKind::Periodic);
        metrics.record_report(ReportKind::Periodic);

        assert_eq!(metrics.reports(ReportKind::Periodic), 2);
        assert!(registry
            .gather()
            .iter()
            .any(|family| family.get_name() == "meterbridge_reports_emitted_total"));
    }

    #[test]
    fn test_double_registration_rejected() {
        let metrics = MeteringMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
