//! Proxy-control collaborator interface and the usage capability derived from it

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::RouteRequest;

/// Which traffic counter a usage reading refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum MeteringKey {
    /// Traffic of one provisioned user (serving side)
    User(String),
    /// Traffic of a whole inbound (consuming side)
    Inbound(String),
}

impl fmt::Display for MeteringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeteringKey::User(name) => write!(f, "user:{}", name),
            MeteringKey::Inbound(tag) => write!(f, "inbound:{}", tag),
        }
    }
}

/// Proxy engine control operations
///
/// Implementations own their connection and any call timeouts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// Allow a user to connect through the serving inbound
    async fn add_user(&self, identity: &str) -> Result<()>;

    /// Revoke a user
    async fn remove_user(&self, identity: &str) -> Result<()>;

    /// Route outbound traffic through the given serving proxy
    async fn configure_route(&self, request: &RouteRequest) -> Result<()>;

    /// Restore direct outbound traffic
    async fn remove_route(&self) -> Result<()>;

    /// Current cumulative traffic counter
    async fn get_usage(&self, key: &MeteringKey) -> Result<u64>;

    /// Reset the traffic counter
    async fn request_counter_reset(&self, key: &MeteringKey) -> Result<()>;
}

/// Capability returning the current cumulative traffic counter of one channel
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UsageGetter: Send + Sync {
    async fn get(&self) -> Result<u64>;
}

/// UsageGetter bound to a metering key on a proxy-control handle
#[derive(Clone)]
pub struct ProxyUsageGetter {
    control: Arc<dyn ProxyControl>,
    key: MeteringKey,
}

impl ProxyUsageGetter {
    pub fn new(control: Arc<dyn ProxyControl>, key: MeteringKey) -> Self {
        Self { control, key }
    }

    pub fn key(&self) -> &MeteringKey {
        &self.key
    }
}

#[async_trait]
impl UsageGetter for ProxyUsageGetter {
    async fn get(&self) -> Result<u64> {
        self.control.get_usage(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_proxy_usage_getter_queries_its_key() {
        let mut control = MockProxyControl::new();
        control
            .expect_get_usage()
            .with(eq(MeteringKey::User("alice".into())))
            .times(1)
            .returning(|_| Ok(4096));

        let getter = ProxyUsageGetter::new(Arc::new(control), MeteringKey::User("alice".into()));
        assert_eq!(getter.get().await.unwrap(), 4096);
    }

    #[test]
    fn test_metering_key_display() {
        assert_eq!(MeteringKey::Inbound("socks".into()).to_string(), "inbound:socks");
    }
}
