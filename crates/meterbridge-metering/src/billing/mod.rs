//! Billing module
//!
//! - ReportDispatcher: turns usage reports into session start/update calls

pub mod dispatcher;

pub use dispatcher::ReportDispatcher;
