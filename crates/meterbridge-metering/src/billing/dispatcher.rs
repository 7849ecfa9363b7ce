//! Report dispatcher
//!
//! Single consumer of the monitor's report channel. First reports open a
//! billing session, every other report updates it with cumulative usage.
//!
//! Severity:
//! - session start failure is fatal (returned to the caller)
//! - session update failure is recoverable, the next tick resends the
//!   cumulative value
//! - a failed final update cannot be resent and is logged as a
//!   reconciliation gap
//!
//! Every delivery is acknowledged after its report was handled, successful
//! or not, so the final report's waiter never outlives the update call.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use meterbridge_common::{Report, Result, SessionClient};

use crate::metering::ReportReceiver;
use crate::metrics::MeteringMetrics;

/// Forwards usage reports to the billing controller
pub struct ReportDispatcher {
    session: Arc<dyn SessionClient>,
    metrics: Arc<MeteringMetrics>,
}

impl ReportDispatcher {
    pub fn new(session: Arc<dyn SessionClient>, metrics: Arc<MeteringMetrics>) -> Self {
        Self { session, metrics }
    }

    /// Consume reports until the channel closes or a fatal error occurs
    pub async fn run(&self, mut reports: ReportReceiver) -> Result<()> {
        info!("Start handling usage reports");

        while let Some(delivery) = reports.recv().await {
            self.dispatch(delivery.report.clone()).await?;
            delivery.acknowledge();
        }

        info!("Report channel closed, dispatcher exiting");
        Ok(())
    }

    /// Forward a single report
    #[instrument(skip(self, report), fields(channel = %report.channel, usage = report.usage, last = report.last))]
    pub async fn dispatch(&self, report: Report) -> Result<()> {
        if report.first {
            if let Err(e) = self.session.start_session("", &report.channel, 0).await {
                error!(error = %e, "Could not start billing session");
                return Err(e);
            }
            self.metrics.session_starts.inc();
            info!("Billing session started");
            return Ok(());
        }

        match self
            .session
            .update_session(&report.channel, report.usage, report.last)
            .await
        {
            Ok(()) => {
                self.metrics.session_updates.inc();
                debug!("Usage reported");
            }
            Err(e) if report.last => {
                self.metrics.reconciliation_gaps.inc();
                error!(
                    reconciliation_gap = true,
                    error = %e,
                    "Final usage update failed, billing keeps a stale value for this channel"
                );
            }
            Err(e) => {
                self.metrics.session_update_failures.inc();
                warn!(error = %e, "Usage update failed, next report resends cumulative usage");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use meterbridge_common::session::MockSessionClient;
    use meterbridge_common::testing::{Call, CallJournal, FixedUsage, InMemorySession};
    use meterbridge_common::{BridgeError, Channel, SessionHandle};
    use mockall::predicate::{always, eq};
    use tokio::sync::mpsc;

    use crate::metering::{Delivery, UsageMonitor};

    fn metrics() -> Arc<MeteringMetrics> {
        Arc::new(MeteringMetrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_first_report_starts_session_with_zero_units() {
        let mut session = MockSessionClient::new();
        session
            .expect_start_session()
            .with(eq(""), eq(Channel::new("c1")), eq(0))
            .times(1)
            .returning(|_, _, _| Ok(SessionHandle::default()));
        session.expect_update_session().never();

        let dispatcher = ReportDispatcher::new(Arc::new(session), metrics());
        dispatcher
            .dispatch(Report::first(Channel::new("c1"), 500))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_start_failure_is_fatal() {
        let mut session = MockSessionClient::new();
        session
            .expect_start_session()
            .returning(|_, _, _| Err(BridgeError::Session("no such offering".into())));

        let dispatcher = ReportDispatcher::new(Arc::new(session), metrics());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Delivery::from(Report::first(Channel::new("c1"), 0))).await.unwrap();
        tx.send(Delivery::from(Report::periodic(Channel::new("c1"), 10))).await.unwrap();

        let err = dispatcher.run(rx).await.unwrap_err();
        assert!(matches!(err, BridgeError::Session(_)));
    }

    #[tokio::test]
    async fn test_update_failure_is_recoverable() {
        let mut session = MockSessionClient::new();
        let mut seq = mockall::Sequence::new();
        session
            .expect_update_session()
            .with(always(), eq(10), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(BridgeError::Session("timeout".into())));
        session
            .expect_update_session()
            .with(always(), eq(20), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let metrics = metrics();
        let dispatcher = ReportDispatcher::new(Arc::new(session), metrics.clone());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Delivery::from(Report::periodic(Channel::new("c1"), 10))).await.unwrap();
        tx.send(Delivery::from(Report::periodic(Channel::new("c1"), 20))).await.unwrap();
        drop(tx);

        dispatcher.run(rx).await.unwrap();
        assert_eq!(metrics.session_update_failures.get(), 1);
        assert_eq!(metrics.session_updates.get(), 1);
        assert_eq!(metrics.reconciliation_gaps.get(), 0);
    }

    #[tokio::test]
    async fn test_failed_final_update_is_counted_as_gap() {
        let journal = CallJournal::new();
        let session = Arc::new(InMemorySession::new(journal.clone()));
        session.fail_update(true);

        let metrics = metrics();
        let dispatcher = ReportDispatcher::new(session, metrics.clone());
        dispatcher
            .dispatch(Report::last(Channel::new("c9"), 900))
            .await
            .unwrap();

        assert_eq!(metrics.reconciliation_gaps.get(), 1);
        assert_eq!(metrics.session_update_failures.get(), 0);
        assert_eq!(
            journal.calls(),
            vec![Call::UpdateSession {
                channel: Channel::new("c9"),
                usage: 900,
                last: true
            }]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_forwarded_in_order() {
        let journal = CallJournal::new();
        let session = Arc::new(InMemorySession::new(journal.clone()));
        let dispatcher = ReportDispatcher::new(session, metrics());

        let chan = Channel::new("c2");
        let (tx, rx) = mpsc::channel(4);
        tx.send(Delivery::from(Report::first(chan.clone(), 3))).await.unwrap();
        tx.send(Delivery::from(Report::periodic(chan.clone(), 30))).await.unwrap();
        tx.send(Delivery::from(Report::last(chan.clone(), 31))).await.unwrap();
        drop(tx);

        dispatcher.run(rx).await.unwrap();
        assert_eq!(
            journal.calls(),
            vec![
                Call::StartSession {
                    channel: chan.clone(),
                    units: 0
                },
                Call::UpdateSession {
                    channel: chan.clone(),
                    usage: 30,
                    last: false
                },
                Call::UpdateSession {
                    channel: chan,
                    usage: 31,
                    last: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_final_report_acknowledged_after_update() {
        let journal = CallJournal::new();
        let session = Arc::new(InMemorySession::new(journal.clone()));
        let metrics = metrics();
        let dispatcher = ReportDispatcher::new(session, metrics.clone());

        let (monitor, rx) = UsageMonitor::new(Duration::from_millis(2), metrics);
        let run = tokio::spawn(async move { dispatcher.run(rx).await });

        let chan = Channel::new("c3");
        monitor.start(chan.clone(), Arc::new(FixedUsage::new(64)));
        tokio::time::timeout(Duration::from_secs(1), async {
            while journal.count(|c| matches!(c, Call::StartSession { .. })) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let final_report = monitor.stop(&chan).unwrap();
        assert!(final_report.wait(Duration::from_secs(1)).await);
        assert_eq!(
            journal.calls().last(),
            Some(&Call::UpdateSession {
                channel: chan,
                usage: 64,
                last: true
            })
        );

        run.abort();
    }
}
