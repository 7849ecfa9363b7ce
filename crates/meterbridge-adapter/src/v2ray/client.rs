//! v2ray API client
//!
//! Implements [`ProxyControl`] on top of the v2ray `HandlerService` and
//! `StatsService` gRPC APIs. The channel connects lazily, so the adapter
//! starts even when v2ray comes up later; the first failing call is what
//! surfaces an unreachable API.

use std::time::Duration;

use async_trait::async_trait;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel as GrpcChannel, Endpoint};
use tonic::Status;
use tracing::{debug, instrument, warn};

use meterbridge_common::{BridgeError, MeteringKey, ProxyControl, Result, RouteRequest};

use super::proto::{self, TypedMessage};
use crate::config::ProxySettings;

/// Outbound routing consumer traffic to the serving proxy
pub const OUTBOUND_VMESS_TAG: &str = "outbound-vmess";
/// Direct outbound used while no route is configured
pub const OUTBOUND_DEFAULT_TAG: &str = "outbound-default";

/// User level granted on the vmess outbound
const OUTBOUND_USER_LEVEL: u32 = 255;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Traffic counter names queried for a metering key
///
/// Usage is the sum of both directions.
pub fn stat_names(key: &MeteringKey) -> [String; 2] {
    let prefix = match key {
        MeteringKey::User(email) => format!("user>>>{}>>>traffic", email),
        MeteringKey::Inbound(tag) => format!("inbound>>>{}>>>traffic", tag),
    };
    [format!("{}>>>uplink", prefix), format!("{}>>>downlink", prefix)]
}

/// v2ray exposes counters only once they have seen traffic
fn is_missing_counter(status: &Status) -> bool {
    status.message().contains("not found")
}

/// Proxy-control client for a v2ray instance
#[derive(Clone)]
pub struct V2RayClient {
    grpc: Grpc<GrpcChannel>,
    inbound_tag: String,
    alter_id: u32,
}

impl V2RayClient {
    /// Create a client for the configured API endpoint without connecting
    pub fn connect_lazy(settings: &ProxySettings) -> Result<Self> {
        let api = if settings.api.contains("://") {
            settings.api.clone()
        } else {
            format!("http://{}", settings.api)
        };

        let endpoint = Endpoint::from_shared(api)
            .map_err(|e| BridgeError::Config(format!("invalid proxy.api: {}", e)))?
            .connect_timeout(CALL_TIMEOUT)
            .timeout(CALL_TIMEOUT);

        Ok(Self {
            grpc: Grpc::new(endpoint.connect_lazy()),
            inbound_tag: settings.inbound_tag.clone(),
            alter_id: settings.alter_id,
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> std::result::Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("v2ray api not ready: {}", e)))?;

        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }

    async fn alter_inbound(&self, operation: TypedMessage) -> Result<()> {
        let request = proto::proxyman::AlterInboundRequest {
            tag: self.inbound_tag.clone(),
            operation: Some(operation),
        };
        self.unary::<_, proto::proxyman::AlterInboundResponse>(proto::proxyman::ALTER_INBOUND, request)
            .await
            .map(|_| ())
            .map_err(|s| proxy_error("alter inbound", s))
    }

    async fn add_outbound(&self, outbound: proto::handler::OutboundHandlerConfig) -> Result<()> {
        let tag = outbound.tag.clone();
        let request = proto::proxyman::AddOutboundRequest {
            outbound: Some(outbound),
        };
        self.unary::<_, proto::proxyman::AddOutboundResponse>(proto::proxyman::ADD_OUTBOUND, request)
            .await
            .map(|_| ())
            .map_err(|s| proxy_error(&format!("add outbound {}", tag), s))
    }

    async fn remove_outbound(&self, tag: &str) -> Result<()> {
        let request = proto::proxyman::RemoveOutboundRequest {
            tag: tag.to_string(),
        };
        self.unary::<_, proto::proxyman::RemoveOutboundResponse>(proto::proxyman::REMOVE_OUTBOUND, request)
            .await
            .map(|_| ())
            .map_err(|s| proxy_error(&format!("remove outbound {}", tag), s))
    }

    async fn get_stat(&self, name: &str, reset: bool) -> Result<u64> {
        let request = proto::stats::GetStatsRequest {
            name: name.to_string(),
            reset,
        };
        match self
            .unary::<_, proto::stats::GetStatsResponse>(proto::stats::GET_STATS, request)
            .await
        {
            Ok(response) => Ok(response
                .stat
                .map(|stat| u64::try_from(stat.value).unwrap_or(0))
                .unwrap_or(0)),
            Err(status) if is_missing_counter(&status) => {
                debug!(counter = name, "Counter not created yet, reading as zero");
                Ok(0)
            }
            Err(status) => Err(proxy_error(&format!("get stats {}", name), status)),
        }
    }

    fn vmess_account(&self, id: &str, alter_id: u32) -> TypedMessage {
        TypedMessage::pack(
            proto::vmess::ACCOUNT_TYPE,
            &proto::vmess::Account {
                id: id.to_string(),
                alter_id,
            },
        )
    }
}

fn proxy_error(op: &str, status: Status) -> BridgeError {
    BridgeError::Proxy(format!("could not {}: {}", op, status.message()))
}

/// vmess outbound pointing at the serving proxy of `route`
pub fn vmess_outbound(route: &RouteRequest, account: TypedMessage) -> proto::handler::OutboundHandlerConfig {
    let receiver = proto::protocol::ServerEndpoint {
        address: Some(proto::net::IpOrDomain::parse(&route.address)),
        port: route.port,
        user: vec![proto::protocol::User {
            level: OUTBOUND_USER_LEVEL,
            email: route.identity.clone(),
            account: Some(account),
        }],
    };

    proto::handler::OutboundHandlerConfig {
        tag: OUTBOUND_VMESS_TAG.to_string(),
        sender_settings: None,
        proxy_settings: Some(TypedMessage::pack(
            proto::vmess::OUTBOUND_CONFIG_TYPE,
            &proto::vmess::OutboundConfig {
                receiver: vec![receiver],
            },
        )),
    }
}

/// Direct outbound restoring unproxied traffic
pub fn default_outbound() -> proto::handler::OutboundHandlerConfig {
    proto::handler::OutboundHandlerConfig {
        tag: OUTBOUND_DEFAULT_TAG.to_string(),
        sender_settings: None,
        proxy_settings: Some(TypedMessage::pack(
            proto::freedom::CONFIG_TYPE,
            &proto::freedom::Config {},
        )),
    }
}

#[async_trait]
impl ProxyControl for V2RayClient {
    #[instrument(skip(self))]
    async fn add_user(&self, identity: &str) -> Result<()> {
        let operation = proto::proxyman::AddUserOperation {
            user: Some(proto::protocol::User {
                level: 0,
                email: identity.to_string(),
                account: Some(self.vmess_account(identity, self.alter_id)),
            }),
        };
        self.alter_inbound(TypedMessage::pack(
            proto::proxyman::ADD_USER_OPERATION_TYPE,
            &operation,
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn remove_user(&self, identity: &str) -> Result<()> {
        let operation = proto::proxyman::RemoveUserOperation {
            email: identity.to_string(),
        };
        self.alter_inbound(TypedMessage::pack(
            proto::proxyman::REMOVE_USER_OPERATION_TYPE,
            &operation,
        ))
        .await
    }

    #[instrument(skip_all, fields(address = %request.address, port = request.port))]
    async fn configure_route(&self, request: &RouteRequest) -> Result<()> {
        let account = self.vmess_account(&request.identity, request.alter_id);
        let result = match self.add_outbound(vmess_outbound(request, account)).await {
            Ok(()) => self.remove_outbound(OUTBOUND_DEFAULT_TAG).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(rollback) = self.remove_route().await {
                warn!(error = %rollback, "Could not roll back partial route configuration");
            }
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_route(&self) -> Result<()> {
        self.add_outbound(default_outbound()).await?;
        self.remove_outbound(OUTBOUND_VMESS_TAG).await
    }

    async fn get_usage(&self, key: &MeteringKey) -> Result<u64> {
        let mut usage: u64 = 0;
        for name in stat_names(key) {
            usage = usage.saturating_add(self.get_stat(&name, false).await?);
        }
        Ok(usage)
    }

    #[instrument(skip(self))]
    async fn request_counter_reset(&self, key: &MeteringKey) -> Result<()> {
        for name in stat_names(key) {
            self.get_stat(&name, true).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_stat_names() {
        assert_eq!(
            stat_names(&MeteringKey::User("alice".into())),
            [
                "user>>>alice>>>traffic>>>uplink".to_string(),
                "user>>>alice>>>traffic>>>downlink".to_string(),
            ]
        );
        assert_eq!(
            stat_names(&MeteringKey::Inbound("socks".into()))[1],
            "inbound>>>socks>>>traffic>>>downlink"
        );
    }

    #[test]
    fn test_vmess_outbound_shape() {
        let route = RouteRequest {
            address: "198.51.100.2".into(),
            identity: "b831381d".into(),
            port: 8443,
            alter_id: 16,
        };
        let account = TypedMessage::pack(
            proto::vmess::ACCOUNT_TYPE,
            &proto::vmess::Account {
                id: route.identity.clone(),
                alter_id: route.alter_id,
            },
        );
        let outbound = vmess_outbound(&route, account);
        assert_eq!(outbound.tag, OUTBOUND_VMESS_TAG);

        let settings = outbound.proxy_settings.unwrap();
        assert_eq!(settings.r#type, proto::vmess::OUTBOUND_CONFIG_TYPE);

        let config = proto::vmess::OutboundConfig::decode(settings.value.as_slice()).unwrap();
        let receiver = &config.receiver[0];
        assert_eq!(receiver.port, 8443);
        assert_eq!(receiver.user[0].level, OUTBOUND_USER_LEVEL);
        assert_eq!(receiver.user[0].email, "b831381d");
    }

    #[test]
    fn test_default_outbound_is_freedom() {
        let outbound = default_outbound();
        assert_eq!(outbound.tag, OUTBOUND_DEFAULT_TAG);
        assert_eq!(
            outbound.proxy_settings.unwrap().r#type,
            "v2ray.core.proxy.freedom.Config"
        );
    }

    #[test]
    fn test_missing_counter_detection() {
        assert!(is_missing_counter(&Status::unknown(
            "user>>>alice>>>traffic>>>uplink not found."
        )));
        assert!(!is_missing_counter(&Status::unavailable("connection refused")));
    }

    #[tokio::test]
    async fn test_invalid_api_rejected() {
        let settings = ProxySettings {
            api: "http://[::1".into(),
            ..Default::default()
        };
        assert!(matches!(
            V2RayClient::connect_lazy(&settings),
            Err(BridgeError::Config(_))
        ));
    }
}
