//! Metering module
//!
//! - UsageMonitor: one polling task per active channel, reports on a shared channel
//! - FinalReport: resolves once the final report of a stopped channel is handled

pub mod monitor;

pub use monitor::{Delivery, FinalReport, ReportReceiver, UsageMonitor, REPORT_CHANNEL_CAPACITY};
