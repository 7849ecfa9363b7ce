//! Product configuration exchanged with the billing controller
//!
//! The serving side publishes where it can be reached; the consuming side
//! turns the same keys, found in an endpoint's additional parameters, into an
//! outbound route request.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Key holding the vmess alter id
pub const PRODUCT_ALTER_ID: &str = "alterId";
/// Key holding the reachable address of the serving proxy
pub const PRODUCT_ADDRESS: &str = "address";
/// Key holding the inbound port of the serving proxy
pub const PRODUCT_PORT: &str = "port";
/// Key holding the external IP of the serving host
pub const PRODUCT_EXTERNAL_IP: &str = "externalIp";

/// Product configuration pushed to the billing controller
pub type ProductConfig = BTreeMap<String, String>;

/// Build the product configuration published by the serving side
pub fn product_config(address: &str, port: u16, alter_id: u32) -> ProductConfig {
    let mut config = ProductConfig::new();
    config.insert(PRODUCT_ALTER_ID.to_string(), alter_id.to_string());
    config.insert(PRODUCT_EXTERNAL_IP.to_string(), address.to_string());
    config.insert(PRODUCT_ADDRESS.to_string(), address.to_string());
    config.insert(PRODUCT_PORT.to_string(), port.to_string());
    config
}

/// Outbound route the consuming side configures on its proxy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Address (IP or domain) of the serving proxy
    pub address: String,
    /// Identity the route authenticates with
    pub identity: String,
    /// Port of the serving proxy
    pub port: u32,
    /// Protocol parameter: vmess alter id
    pub alter_id: u32,
}

impl RouteRequest {
    /// Build a route request from an endpoint's additional parameters
    pub fn from_params(identity: &str, params: &serde_json::Value) -> Result<Self, EndpointError> {
        let params: HashMap<String, String> = serde_json::from_value(params.clone())
            .map_err(|e| EndpointError::Malformed(e.to_string()))?;

        let address = required(&params, PRODUCT_ADDRESS)?.to_string();
        let port = parse_required(&params, PRODUCT_PORT)?;
        let alter_id = parse_required(&params, PRODUCT_ALTER_ID)?;

        Ok(Self {
            address,
            identity: identity.to_string(),
            port,
            alter_id,
        })
    }
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, EndpointError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| EndpointError::MissingParam {
            key: key.to_string(),
        })
}

fn parse_required<T: FromStr>(params: &HashMap<String, String>, key: &str) -> Result<T, EndpointError> {
    let raw = required(params, key)?;
    raw.trim().parse().map_err(|_| EndpointError::InvalidParam {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_request_from_params() {
        let params = json!({"address": "203.0.113.7", "port": "443", "alterId": "64"});
        let req = RouteRequest::from_params("user-1", &params).unwrap();

        assert_eq!(req.address, "203.0.113.7");
        assert_eq!(req.port, 443);
        assert_eq!(req.alter_id, 64);
        assert_eq!(req.identity, "user-1");
    }

    #[test]
    fn test_route_request_missing_key() {
        let params = json!({"address": "203.0.113.7", "port": "443"});
        assert_eq!(
            RouteRequest::from_params("user-1", &params),
            Err(EndpointError::MissingParam {
                key: PRODUCT_ALTER_ID.to_string()
            })
        );
    }

    #[test]
    fn test_route_request_bad_port() {
        let params = json!({"address": "a.example", "port": "http", "alterId": "1"});
        assert!(matches!(
            RouteRequest::from_params("user-1", &params),
            Err(EndpointError::InvalidParam { .. })
        ));

        assert!(matches!(
            RouteRequest::from_params("user-1", &serde_json::Value::Null),
            Err(EndpointError::Malformed(_))
        ));
    }

    #[test]
    fn test_product_config_round_trips_into_route() {
        let config = product_config("198.51.100.2", 8443, 16);
        let params = serde_json::to_value(&config).unwrap();
        let req = RouteRequest::from_params("id", &params).unwrap();

        assert_eq!(req.address, "198.51.100.2");
        assert_eq!(req.port, 8443);
        assert_eq!(req.alter_id, 16);
        assert_eq!(config[PRODUCT_EXTERNAL_IP], "198.51.100.2");
    }
}
