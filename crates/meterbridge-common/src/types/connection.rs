//! Connection-change events and endpoint metadata from the billing controller

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Channel;
use crate::error::EndpointError;

/// Lifecycle event kind announced by the billing controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnStatus {
    /// Channel created, proxy must be told about the user/route
    Create,
    /// Traffic is about to flow, metering starts
    Start,
    /// Channel is over, configuration is torn down
    Stop,
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnStatus::Create => write!(f, "create"),
            ConnStatus::Start => write!(f, "start"),
            ConnStatus::Stop => write!(f, "stop"),
        }
    }
}

/// A single connection-change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnChange {
    pub channel: Channel,
    pub status: ConnStatus,
}

impl ConnChange {
    pub fn new(channel: impl Into<Channel>, status: ConnStatus) -> Self {
        Self {
            channel: channel.into(),
            status,
        }
    }
}

/// Endpoint metadata resolved from a channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Identity presented to the proxy engine
    pub username: Option<String>,

    /// Product-specific parameters (a JSON object of strings)
    #[serde(default)]
    pub additional_params: serde_json::Value,
}

impl Endpoint {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            additional_params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.additional_params = params;
        self
    }

    /// Identity to present to the proxy engine
    ///
    /// Absent and blank identities are both rejected.
    pub fn identity(&self, channel: &Channel) -> Result<&str, EndpointError> {
        match self.username.as_deref().map(str::trim) {
            Some(identity) if !identity.is_empty() => Ok(identity),
            _ => Err(EndpointError::MissingIdentity {
                channel: channel.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_change_wire_shape() {
        let change: ConnChange =
            serde_json::from_str(r#"{"channel":"0x01","status":"start"}"#).unwrap();
        assert_eq!(change, ConnChange::new("0x01", ConnStatus::Start));
    }

    #[test]
    fn test_identity_required() {
        let channel = Channel::new("0x01");

        let endpoint = Endpoint::new("b831381d-6324-4d53-ad4f-8cda48b30811");
        assert_eq!(
            endpoint.identity(&channel).unwrap(),
            "b831381d-6324-4d53-ad4f-8cda48b30811"
        );

        assert!(Endpoint::default().identity(&channel).is_err());
        assert_eq!(
            Endpoint::new("  ").identity(&channel),
            Err(EndpointError::MissingIdentity { channel })
        );
    }
}
