//! Usage monitor
//!
//! Runs one polling task per monitored channel. Every task owns a
//! cancellation token and loops `poll -> emit -> sleep-or-cancel`; on
//! cancellation it takes one more reading, emits the final report and
//! unregisters itself.
//!
//! All tasks share a single capacity-one report channel, so a slow consumer
//! stalls the pollers instead of letting reports pile up. The final report
//! carries an acknowledgement: [`UsageMonitor::stop`] hands out a
//! [`FinalReport`] that resolves once the consumer has handled it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use meterbridge_common::{Channel, Report, UsageGetter, POLL_FAILURE_ALERT_THRESHOLD};

use crate::metrics::MeteringMetrics;

/// Capacity of the shared report channel
pub const REPORT_CHANNEL_CAPACITY: usize = 1;

/// Shortest accepted polling period
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Receiving end of the shared report channel
pub type ReportReceiver = mpsc::Receiver<Delivery>;

type TaskTable = Arc<Mutex<HashMap<Channel, MonitorTask>>>;

/// A report on the shared channel
///
/// Consumers call [`Delivery::acknowledge`] once the report is handled.
/// Dropping a delivery without acknowledging releases any waiter too.
#[derive(Debug)]
pub struct Delivery {
    pub report: Report,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    pub fn acknowledge(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

impl From<Report> for Delivery {
    fn from(report: Report) -> Self {
        Self { report, ack: None }
    }
}

/// Completion of a channel's final report
#[derive(Debug)]
pub struct FinalReport(oneshot::Receiver<()>);

impl FinalReport {
    /// Wait until the consumer acknowledged the final report
    ///
    /// Returns false on timeout, or when the report never reached a consumer.
    pub async fn wait(self, limit: Duration) -> bool {
        matches!(tokio::time::timeout(limit, self.0).await, Ok(Ok(())))
    }
}

/// Registry entry of a running poller
struct MonitorTask {
    token: CancellationToken,
    /// Set by `stop`, taken by the poller for its final report
    ack: Option<oneshot::Sender<()>>,
}

/// Counts and reports traffic usage per channel
pub struct UsageMonitor {
    period: Duration,
    tasks: TaskTable,
    reports_tx: mpsc::Sender<Delivery>,
    metrics: Arc<MeteringMetrics>,
}

impl UsageMonitor {
    /// Create a monitor polling every `period`
    ///
    /// Returns the monitor and the single receiver all reports arrive on.
    pub fn new(period: Duration, metrics: Arc<MeteringMetrics>) -> (Self, ReportReceiver) {
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        let period = period.max(MIN_PERIOD);
        info!(period_ms = period.as_millis() as u64, "Usage monitor initialized");

        let monitor = Self {
            period,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            reports_tx,
            metrics,
        };
        (monitor, reports_rx)
    }

    /// Start monitoring a channel
    ///
    /// A channel that already has a poller (running or draining its final
    /// report) keeps it; the call only logs a warning.
    pub fn start(&self, channel: Channel, getter: Arc<dyn UsageGetter>) {
        let mut tasks = self.tasks.lock();

        if let Some(task) = tasks.get(&channel) {
            if task.token.is_cancelled() {
                warn!(channel = %channel, "Start requested while final report is pending, ignoring");
            } else {
                warn!(channel = %channel, "Channel is already monitored, ignoring start");
            }
            return;
        }

        info!(channel = %channel, "Start monitoring");

        let token = CancellationToken::new();
        let poller = Poller {
            channel: channel.clone(),
            getter,
            first_tick: Instant::now() + self.period,
            period: self.period,
            token: token.clone(),
            reports: self.reports_tx.clone(),
            tasks: self.tasks.clone(),
            metrics: self.metrics.clone(),
            consecutive_failures: 0,
            last_known: 0,
        };

        // Registered before the task exists; the poller removes its own entry.
        tasks.insert(channel, MonitorTask { token, ack: None });
        self.metrics.active_monitors.set(tasks.len() as i64);
        drop(tasks);

        tokio::spawn(poller.run());
    }

    /// Stop monitoring a channel
    ///
    /// Never blocks: the poller emits the final report on its own. Callers
    /// that must not act before billing has seen the final usage await the
    /// returned handle. `None` when there was nothing left to stop.
    pub fn stop(&self, channel: &Channel) -> Option<FinalReport> {
        let mut tasks = self.tasks.lock();

        match tasks.get_mut(channel) {
            None => {
                warn!(channel = %channel, "Stop requested for channel that is not monitored");
                None
            }
            Some(task) if task.token.is_cancelled() => {
                warn!(channel = %channel, "Stop already requested for channel");
                None
            }
            Some(task) => {
                info!(channel = %channel, "Stop monitoring");
                let (tx, rx) = oneshot::channel();
                task.ack = Some(tx);
                task.token.cancel();
                Some(FinalReport(rx))
            }
        }
    }

    /// Whether a poller (running or draining) exists for the channel
    pub fn is_monitoring(&self, channel: &Channel) -> bool {
        self.tasks.lock().contains_key(channel)
    }

    /// Channels with a registered poller
    pub fn active_channels(&self) -> Vec<Channel> {
        self.tasks.lock().keys().cloned().collect()
    }
}

/// Per-channel polling task
struct Poller {
    channel: Channel,
    getter: Arc<dyn UsageGetter>,
    first_tick: Instant,
    period: Duration,
    token: CancellationToken,
    reports: mpsc::Sender<Delivery>,
    tasks: TaskTable,
    metrics: Arc<MeteringMetrics>,
    consecutive_failures: u32,
    last_known: u64,
}

impl Poller {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(self.first_tick, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut first = true;

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => break,

                _ = ticker.tick() => {
                    let usage = self.poll().await.unwrap_or(0);
                    let report = if first {
                        Report::first(self.channel.clone(), usage)
                    } else {
                        Report::periodic(self.channel.clone(), usage)
                    };

                    if !self.emit(report, None).await {
                        return;
                    }
                    first = false;
                }
            }
        }

        // Fresh read for the final report; fall back to the last good reading.
        let usage = match self.poll().await {
            Some(usage) => usage,
            None => self.last_known,
        };
        let ack = self
            .tasks
            .lock()
            .get_mut(&self.channel)
            .and_then(|task| task.ack.take());
        self.emit(Report::last(self.channel.clone(), usage), ack).await;

        debug!(channel = %self.channel, "Monitoring finished");
    }

    async fn poll(&mut self) -> Option<u64> {
        match self.getter.get().await {
            Ok(usage) => {
                if self.consecutive_failures >= POLL_FAILURE_ALERT_THRESHOLD {
                    info!(channel = %self.channel, "Usage polls recovered");
                }
                self.consecutive_failures = 0;
                self.last_known = usage;
                Some(usage)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.metrics.poll_failures.inc();

                if self.consecutive_failures >= POLL_FAILURE_ALERT_THRESHOLD {
                    self.metrics.poll_failure_alerts.inc();
                    error!(
                        channel = %self.channel,
                        failures = self.consecutive_failures,
                        error = %e,
                        "Usage polls keep failing, reporting zero"
                    );
                } else {
                    warn!(channel = %self.channel, error = %e, "Usage poll failed, reporting zero");
                }
                None
            }
        }
    }

    /// Deliver a report; false when the channel has no consumer left
    ///
    /// A periodic report still waiting for the consumer when the channel is
    /// stopped is dropped: the final report carries a fresher value.
    async fn emit(&self, report: Report, ack: Option<oneshot::Sender<()>>) -> bool {
        let kind = report.kind();
        let droppable = !report.first && !report.last;
        let delivery = Delivery { report, ack };

        let sent = if droppable {
            tokio::select! {
                biased;
                res = self.reports.send(delivery) => res.is_ok(),
                _ = self.token.cancelled() => {
                    debug!(channel = %self.channel, "Dropped pending periodic report on stop");
                    return true;
                }
            }
        } else {
            self.reports.send(delivery).await.is_ok()
        };

        if sent {
            self.metrics.record_report(kind);
        } else {
            warn!(channel = %self.channel, "Report channel closed, monitoring ends");
        }
        sent
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        tasks.remove(&self.channel);
        self.metrics.active_monitors.set(tasks.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterbridge_common::proxy::MockUsageGetter;
    use meterbridge_common::testing::FixedUsage;
    use meterbridge_common::{BridgeError, ReportKind};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    fn monitor(period: Duration) -> (UsageMonitor, ReportReceiver, Arc<MeteringMetrics>) {
        let metrics = Arc::new(MeteringMetrics::new().unwrap());
        let (monitor, rx) = UsageMonitor::new(period, metrics.clone());
        (monitor, rx, metrics)
    }

    async fn next(rx: &mut ReportReceiver) -> Report {
        timeout(WAIT, rx.recv())
            .await
            .expect("usage was not reported: timeout")
            .expect("report channel closed")
            .report
    }

    /// Receive until the final report of `channel`, checking everything before it
    async fn drain_until_last(rx: &mut ReportReceiver, channel: &Channel) -> Report {
        loop {
            let report = next(rx).await;
            assert_eq!(&report.channel, channel);
            assert!(!report.first, "unexpected first report: {:?}", report);
            if report.last {
                return report;
            }
        }
    }

    #[tokio::test]
    async fn test_monitor_lifecycle() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(1));
        let bar = Channel::new("bar");

        monitor.start(bar.clone(), Arc::new(FixedUsage::new(100)));

        assert_eq!(next(&mut rx).await, Report::first(bar.clone(), 100));
        assert_eq!(next(&mut rx).await, Report::periodic(bar.clone(), 100));

        monitor.stop(&bar);
        assert_eq!(drain_until_last(&mut rx, &bar).await, Report::last(bar.clone(), 100));

        // Second stop is a no-op and nothing else arrives for the channel.
        monitor.stop(&bar);
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert!(!monitor.is_monitoring(&bar));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_report_waits_for_first_tick() {
        let (monitor, mut rx, _) = monitor(Duration::from_secs(10));
        let chan = Channel::new("c1");

        monitor.start(chan.clone(), Arc::new(FixedUsage::new(5)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        let delivery = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(delivery.report, Report::first(chan, 5));
    }

    #[tokio::test]
    async fn test_stop_unmonitored_channel_is_noop() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(1));

        assert!(monitor.stop(&Channel::new("ghost")).is_none());

        assert!(timeout(Duration::from_millis(20), rx.recv()).await.is_err());
        assert!(monitor.active_channels().is_empty());
    }

    #[tokio::test]
    async fn test_double_start_keeps_single_task() {
        let (monitor, mut rx, metrics) = monitor(Duration::from_millis(2));
        let chan = Channel::new("dup");
        let usage = Arc::new(FixedUsage::new(1));

        monitor.start(chan.clone(), usage.clone());
        monitor.start(chan.clone(), usage.clone());
        assert_eq!(monitor.active_channels(), vec![chan.clone()]);

        let mut firsts = 0;
        for _ in 0..6 {
            if next(&mut rx).await.first {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);

        monitor.stop(&chan);
        drain_until_last(&mut rx, &chan).await;
        assert_eq!(metrics.reports(ReportKind::Last), 1);
    }

    #[tokio::test]
    async fn test_final_report_uses_fresh_read() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(5));
        let chan = Channel::new("fresh");
        let usage = Arc::new(FixedUsage::new(10));

        monitor.start(chan.clone(), usage.clone());
        assert_eq!(next(&mut rx).await.usage, 10);

        usage.set(250);
        monitor.stop(&chan);
        assert_eq!(drain_until_last(&mut rx, &chan).await.usage, 250);
    }

    #[tokio::test]
    async fn test_poll_failures_report_zero_and_keep_polling() {
        let (monitor, mut rx, metrics) = monitor(Duration::from_millis(1));
        let chan = Channel::new("flaky");
        let usage = Arc::new(FixedUsage::new(42));
        usage.fail_next(3);

        monitor.start(chan.clone(), usage);

        assert_eq!(next(&mut rx).await, Report::first(chan.clone(), 0));
        assert_eq!(next(&mut rx).await.usage, 0);
        assert_eq!(next(&mut rx).await.usage, 0);
        assert_eq!(next(&mut rx).await.usage, 42);

        assert_eq!(metrics.poll_failures.get(), 3);
        assert_eq!(metrics.poll_failure_alerts.get(), 1);

        monitor.stop(&chan);
        drain_until_last(&mut rx, &chan).await;
    }

    #[tokio::test]
    async fn test_final_report_falls_back_to_last_known_value() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(5));
        let chan = Channel::new("last-known");

        let mut getter = MockUsageGetter::new();
        let mut seq = mockall::Sequence::new();
        getter
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(77));
        getter
            .expect_get()
            .in_sequence(&mut seq)
            .returning(|| Err(BridgeError::Proxy("stats service down".into())));

        monitor.start(chan.clone(), Arc::new(getter));
        assert_eq!(next(&mut rx).await, Report::first(chan.clone(), 77));

        monitor.stop(&chan);
        assert_eq!(drain_until_last(&mut rx, &chan).await, Report::last(chan, 77));
    }

    #[tokio::test]
    async fn test_channels_report_independently() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(1));
        let a = Channel::new("a");
        let b = Channel::new("b");

        monitor.start(a.clone(), Arc::new(FixedUsage::new(1)));
        monitor.start(b.clone(), Arc::new(FixedUsage::new(2)));

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        while seen_a.len() < 3 || seen_b.len() < 3 {
            let report = next(&mut rx).await;
            if report.channel == a {
                assert_eq!(report.usage, 1);
                seen_a.push(report);
            } else {
                assert_eq!(report.usage, 2);
                seen_b.push(report);
            }
        }

        assert!(seen_a[0].first && !seen_a[1].first);
        assert!(seen_b[0].first && !seen_b[1].first);

        monitor.stop(&a);
        monitor.stop(&b);
        let mut lasts = 0;
        while lasts < 2 {
            if next(&mut rx).await.last {
                lasts += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_restart_after_cleanup() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(1));
        let chan = Channel::new("again");

        monitor.start(chan.clone(), Arc::new(FixedUsage::new(3)));
        assert!(next(&mut rx).await.first);
        monitor.stop(&chan);
        drain_until_last(&mut rx, &chan).await;

        timeout(WAIT, async {
            while monitor.is_monitoring(&chan) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        monitor.start(chan.clone(), Arc::new(FixedUsage::new(9)));
        assert_eq!(next(&mut rx).await, Report::first(chan.clone(), 9));
        monitor.stop(&chan);
        drain_until_last(&mut rx, &chan).await;
    }

    #[tokio::test]
    async fn test_final_report_resolves_after_acknowledgement() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(5));
        let chan = Channel::new("acked");

        monitor.start(chan.clone(), Arc::new(FixedUsage::new(8)));
        assert!(next(&mut rx).await.first);

        let final_report = monitor.stop(&chan).unwrap();
        assert!(monitor.stop(&chan).is_none());

        let delivery = loop {
            let delivery = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            if delivery.report.last {
                break delivery;
            }
        };
        assert_eq!(delivery.report, Report::last(chan, 8));

        let waiter = tokio::spawn(final_report.wait(WAIT));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        delivery.acknowledge();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_final_report_released_when_consumer_drops_it() {
        let (monitor, mut rx, _) = monitor(Duration::from_millis(5));
        let chan = Channel::new("dropped");

        monitor.start(chan.clone(), Arc::new(FixedUsage::new(1)));
        next(&mut rx).await;

        let final_report = monitor.stop(&chan).unwrap();
        drain_until_last(&mut rx, &chan).await;
        assert!(!final_report.wait(WAIT).await);
    }
}
