//! # meterbridge common
//!
//! Shared types, errors, and collaborator interfaces for meterbridge, the
//! bridge between a billing/session controller and a proxy engine.
//!
//! ## Core Types
//!
//! - [`Channel`]: opaque identifier of a logical connection
//! - [`Report`]: cumulative usage of a channel plus first/last flags
//! - [`ConnChange`]: lifecycle event announced by the billing controller
//! - [`Endpoint`]: identity and product parameters resolved from a channel
//!
//! ## Collaborators
//!
//! - [`SessionClient`]: billing/session controller
//! - [`ProxyControl`]: proxy engine control API
//! - [`UsageGetter`]: per-channel traffic counter capability

pub mod error;
pub mod proxy;
pub mod session;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used types at crate root
pub use error::{BridgeError, EndpointError, Result, StoreError};
pub use proxy::{MeteringKey, ProxyControl, ProxyUsageGetter, UsageGetter};
pub use session::{ConnChangeStream, SessionClient, SessionHandle};
pub use types::{
    channel::Channel,
    connection::{ConnChange, ConnStatus, Endpoint},
    product::{ProductConfig, RouteRequest},
    report::{Report, ReportKind},
};

/// meterbridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default usage polling period in seconds
pub const DEFAULT_COUNT_PERIOD_SECS: u64 = 60;

/// Consecutive poll failures after which an operator alert is raised
pub const POLL_FAILURE_ALERT_THRESHOLD: u32 = 3;

/// File name of the active channel record
pub const ACTIVE_CHANNEL_FILE: &str = "active";

/// File name of the product-config-pushed marker
pub const CONFIG_PUSHED_FILE: &str = "configPushed";
