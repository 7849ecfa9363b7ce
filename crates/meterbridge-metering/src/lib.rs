//! # meterbridge metering
//!
//! Usage metering and billing report dispatch.
//!
//! ## Pipeline
//!
//! ```text
//! UsageGetter --poll--> UsageMonitor --Report--> ReportDispatcher --> SessionClient
//! ```
//!
//! - [`UsageMonitor`]: one polling task per channel, first/periodic/last reports
//! - [`ReportDispatcher`]: opens billing sessions and forwards cumulative usage
//! - [`MeteringMetrics`]: Prometheus counters for both sides

pub mod billing;
pub mod metering;
pub mod metrics;

pub use billing::ReportDispatcher;
pub use metering::{Delivery, FinalReport, ReportReceiver, UsageMonitor, REPORT_CHANNEL_CAPACITY};
pub use metrics::MeteringMetrics;
