//! v2ray proxy engine binding

pub mod client;
pub mod proto;

pub use client::V2RayClient;
