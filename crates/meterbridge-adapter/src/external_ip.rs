//! External address lookup for the published product configuration

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, instrument};

use meterbridge_common::{BridgeError, Result};

/// Plain-text "what is my IP" service
pub const LOOKUP_URL: &str = "http://api.ipify.org";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Ask [`LOOKUP_URL`] for this host's public address
#[instrument]
pub async fn lookup() -> Result<String> {
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let uri: hyper::Uri = LOOKUP_URL
        .parse()
        .map_err(|e| BridgeError::Config(format!("invalid lookup url: {}", e)))?;

    let response = tokio::time::timeout(LOOKUP_TIMEOUT, client.get(uri))
        .await
        .map_err(|_| BridgeError::Transport("external address lookup timed out".into()))?
        .map_err(|e| BridgeError::Transport(format!("external address lookup failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(BridgeError::Transport(format!(
            "external address lookup returned {}",
            response.status()
        )));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))?
        .to_bytes();

    let address = parse_address(&body)?;
    debug!(address = %address, "External address resolved");
    Ok(address)
}

fn parse_address(body: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(body)
        .map_err(|e| BridgeError::Serialization(e.to_string()))?
        .trim();
    text.parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| BridgeError::Transport(format!("unexpected lookup answer `{}`", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address(b"203.0.113.9\n").unwrap(), "203.0.113.9");
        assert_eq!(parse_address(b"2001:db8::1").unwrap(), "2001:db8::1");
        assert!(parse_address(b"<html>rate limited</html>").is_err());
    }
}
