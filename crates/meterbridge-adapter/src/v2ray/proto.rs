//! Protobuf messages of the v2ray API
//!
//! Only the messages the adapter sends or reads are declared. Field tags match
//! the upstream `.proto` definitions.

use prost::Message;

/// Serialized message with its full protobuf type name
#[derive(Clone, PartialEq, Message)]
pub struct TypedMessage {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

impl TypedMessage {
    pub fn pack<M: Message>(type_name: &str, message: &M) -> Self {
        Self {
            r#type: type_name.to_string(),
            value: message.encode_to_vec(),
        }
    }
}

// ============================================================================
// v2ray.core.common
// ============================================================================

pub mod protocol {
    use super::*;

    #[derive(Clone, PartialEq, Message)]
    pub struct User {
        #[prost(uint32, tag = "1")]
        pub level: u32,
        #[prost(string, tag = "2")]
        pub email: String,
        #[prost(message, optional, tag = "3")]
        pub account: Option<TypedMessage>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct ServerEndpoint {
        #[prost(message, optional, tag = "1")]
        pub address: Option<super::net::IpOrDomain>,
        #[prost(uint32, tag = "2")]
        pub port: u32,
        #[prost(message, repeated, tag = "3")]
        pub user: Vec<User>,
    }
}

pub mod net {
    use std::net::IpAddr;

    use super::*;

    #[derive(Clone, PartialEq, Message)]
    pub struct IpOrDomain {
        #[prost(oneof = "ip_or_domain::Address", tags = "1, 2")]
        pub address: Option<ip_or_domain::Address>,
    }

    pub mod ip_or_domain {
        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Address {
            #[prost(bytes, tag = "1")]
            Ip(Vec<u8>),
            #[prost(string, tag = "2")]
            Domain(String),
        }
    }

    impl IpOrDomain {
        /// IP literals are sent as raw octets, anything else as a domain
        pub fn parse(address: &str) -> Self {
            let address = match address.parse::<IpAddr>() {
                Ok(IpAddr::V4(ip)) => ip_or_domain::Address::Ip(ip.octets().to_vec()),
                Ok(IpAddr::V6(ip)) => ip_or_domain::Address::Ip(ip.octets().to_vec()),
                Err(_) => ip_or_domain::Address::Domain(address.to_string()),
            };
            Self {
                address: Some(address),
            }
        }
    }
}

// ============================================================================
// v2ray.core (handler configs) and proxies
// ============================================================================

pub mod handler {
    use super::*;

    #[derive(Clone, PartialEq, Message)]
    pub struct OutboundHandlerConfig {
        #[prost(string, tag = "1")]
        pub tag: String,
        #[prost(message, optional, tag = "2")]
        pub sender_settings: Option<TypedMessage>,
        #[prost(message, optional, tag = "3")]
        pub proxy_settings: Option<TypedMessage>,
    }
}

pub mod vmess {
    use super::*;

    pub const ACCOUNT_TYPE: &str = "v2ray.core.proxy.vmess.Account";
    pub const OUTBOUND_CONFIG_TYPE: &str = "v2ray.core.proxy.vmess.outbound.Config";

    #[derive(Clone, PartialEq, Message)]
    pub struct Account {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(uint32, tag = "2")]
        pub alter_id: u32,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct OutboundConfig {
        #[prost(message, repeated, tag = "1")]
        pub receiver: Vec<super::protocol::ServerEndpoint>,
    }
}

pub mod freedom {
    use super::*;

    pub const CONFIG_TYPE: &str = "v2ray.core.proxy.freedom.Config";

    /// Direct outbound; all defaults
    #[derive(Clone, PartialEq, Message)]
    pub struct Config {}
}

// ============================================================================
// v2ray.core.app.proxyman.command
// ============================================================================

pub mod proxyman {
    use super::*;

    pub const ALTER_INBOUND: &str = "/v2ray.core.app.proxyman.command.HandlerService/AlterInbound";
    pub const ADD_OUTBOUND: &str = "/v2ray.core.app.proxyman.command.HandlerService/AddOutbound";
    pub const REMOVE_OUTBOUND: &str =
        "/v2ray.core.app.proxyman.command.HandlerService/RemoveOutbound";

    pub const ADD_USER_OPERATION_TYPE: &str = "v2ray.core.app.proxyman.command.AddUserOperation";
    pub const REMOVE_USER_OPERATION_TYPE: &str =
        "v2ray.core.app.proxyman.command.RemoveUserOperation";

    #[derive(Clone, PartialEq, Message)]
    pub struct AddUserOperation {
        #[prost(message, optional, tag = "1")]
        pub user: Option<super::protocol::User>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct RemoveUserOperation {
        #[prost(string, tag = "1")]
        pub email: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct AlterInboundRequest {
        #[prost(string, tag = "1")]
        pub tag: String,
        #[prost(message, optional, tag = "2")]
        pub operation: Option<TypedMessage>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct AlterInboundResponse {}

    #[derive(Clone, PartialEq, Message)]
    pub struct AddOutboundRequest {
        #[prost(message, optional, tag = "1")]
        pub outbound: Option<super::handler::OutboundHandlerConfig>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct AddOutboundResponse {}

    #[derive(Clone, PartialEq, Message)]
    pub struct RemoveOutboundRequest {
        #[prost(string, tag = "1")]
        pub tag: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct RemoveOutboundResponse {}
}

// ============================================================================
// v2ray.core.app.stats.command
// ============================================================================

pub mod stats {
    use super::*;

    pub const GET_STATS: &str = "/v2ray.core.app.stats.command.StatsService/GetStats";

    #[derive(Clone, PartialEq, Message)]
    pub struct GetStatsRequest {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(bool, tag = "2")]
        pub reset: bool,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Stat {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int64, tag = "2")]
        pub value: i64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetStatsResponse {
        #[prost(message, optional, tag = "1")]
        pub stat: Option<Stat>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_message_carries_payload() {
        let account = vmess::Account {
            id: "b831381d".into(),
            alter_id: 64,
        };
        let typed = TypedMessage::pack(vmess::ACCOUNT_TYPE, &account);

        assert_eq!(typed.r#type, "v2ray.core.proxy.vmess.Account");
        assert_eq!(vmess::Account::decode(typed.value.as_slice()).unwrap(), account);
    }

    #[test]
    fn test_ip_or_domain() {
        assert_eq!(
            net::IpOrDomain::parse("203.0.113.9").address,
            Some(net::ip_or_domain::Address::Ip(vec![203, 0, 113, 9]))
        );
        assert_eq!(
            net::IpOrDomain::parse("proxy.example.net").address,
            Some(net::ip_or_domain::Address::Domain("proxy.example.net".into()))
        );
    }
}
