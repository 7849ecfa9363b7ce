//! # meterbridge adapter
//!
//! Drives a v2ray proxy engine from the billing controller's connection
//! changes and meters its traffic back into billing sessions.
//!
//! ## Components
//!
//! - [`event_loop::ConnectionEventLoop`]: sequential per-channel state machine
//! - [`roles`]: agent (serving) and client (consuming) reactions
//! - [`store`]: durable markers for crash recovery and the one-time config push
//! - [`v2ray::V2RayClient`]: proxy-control over the v2ray gRPC API
//! - [`nats::NatsSessionClient`]: billing/session controller over NATS
//! - [`daemon`]: wiring and the top-level run loop

pub mod config;
pub mod context;
pub mod daemon;
pub mod event_loop;
pub mod external_ip;
pub mod nats;
pub mod product;
pub mod roles;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod v2ray;

pub use config::{AdapterConfig, CliArgs, RoleKind};
pub use context::AdapterContext;
pub use event_loop::ConnectionEventLoop;
pub use state::ConnectionState;
