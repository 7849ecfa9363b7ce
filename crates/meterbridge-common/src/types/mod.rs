//! Core data types for meterbridge

pub mod channel;
pub mod connection;
pub mod product;
pub mod report;

pub use channel::Channel;
pub use connection::{ConnChange, ConnStatus, Endpoint};
pub use product::{ProductConfig, RouteRequest};
pub use report::{Report, ReportKind};
