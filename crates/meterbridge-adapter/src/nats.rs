//! Session client over NATS
//!
//! Request/reply JSON on `{prefix}.{method}` subjects. Every request carries
//! the product credentials next to its parameters:
//!
//! ```text
//! -> {"product": "...", "origin": "...", "params": {...}}
//! <- {"result": ...} | {"error": "..."}
//! ```
//!
//! Connection changes arrive as [`ConnChange`] JSON on `{prefix}.conn_change`.

use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use meterbridge_common::{
    BridgeError, Channel, ConnChange, ConnChangeStream, Endpoint, ProductConfig, Result,
    SessionClient, SessionHandle,
};

use crate::config::SessionSettings;

pub const METHOD_GET_ENDPOINT: &str = "get_endpoint";
pub const METHOD_START_SESSION: &str = "start_session";
pub const METHOD_UPDATE_SESSION: &str = "update_session";
pub const METHOD_STOP_SESSION: &str = "stop_session";
pub const METHOD_SET_PRODUCT_CONFIG: &str = "set_product_config";
pub const CONN_CHANGE_SUBJECT: &str = "conn_change";

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a, P> {
    product: &'a str,
    origin: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct ReplyEnvelope {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a reply into its result
fn decode_reply<R: DeserializeOwned>(method: &str, payload: &[u8]) -> Result<R> {
    let reply: ReplyEnvelope = serde_json::from_slice(payload)?;
    if let Some(error) = reply.error {
        return Err(BridgeError::Session(format!("{}: {}", method, error)));
    }
    Ok(serde_json::from_value(reply.result)?)
}

/// Billing/session controller reached over NATS
pub struct NatsSessionClient {
    client: Client,
    product: String,
    origin: String,
    prefix: String,
}

impl NatsSessionClient {
    /// Connect and authenticate as `origin`
    pub async fn connect(settings: &SessionSettings) -> Result<Self> {
        let client = ConnectOptions::with_user_and_password(
            settings.origin.clone(),
            settings.password.clone(),
        )
        .request_timeout(Some(settings.request_timeout()))
        .connect(settings.url.as_str())
        .await
        .map_err(|e| BridgeError::Transport(format!("could not connect to {}: {}", settings.url, e)))?;

        info!(url = %settings.url, product = %settings.product, "Connected to session server");

        Ok(Self {
            client,
            product: settings.product.clone(),
            origin: settings.origin.clone(),
            prefix: settings.subject_prefix.clone(),
        })
    }

    fn subject(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let envelope = RequestEnvelope {
            product: &self.product,
            origin: &self.origin,
            params,
        };
        let payload = Bytes::from(serde_json::to_vec(&envelope)?);

        let reply = self
            .client
            .request(self.subject(method), payload)
            .await
            .map_err(|e| BridgeError::Session(format!("{}: {}", method, e)))?;

        decode_reply(method, &reply.payload)
    }
}

#[async_trait]
impl SessionClient for NatsSessionClient {
    async fn subscribe_conn_changes(&self) -> Result<ConnChangeStream> {
        let subject = self.subject(CONN_CHANGE_SUBJECT);
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| BridgeError::Subscription(e.to_string()))?;
        info!(subject = %subject, "Subscribed to connection changes");

        let changes = subscriber.map(|message| {
            serde_json::from_slice::<ConnChange>(&message.payload).map_err(|e| {
                BridgeError::Subscription(format!("malformed connection change: {}", e))
            })
        });
        Ok(changes.boxed())
    }

    #[instrument(skip(self), fields(channel = %channel))]
    async fn get_endpoint(&self, channel: &Channel) -> Result<Endpoint> {
        self.call(METHOD_GET_ENDPOINT, json!({ "channel": channel }))
            .await
    }

    #[instrument(skip(self), fields(channel = %channel))]
    async fn start_session(&self, id: &str, channel: &Channel, units: u64) -> Result<SessionHandle> {
        let handle: Option<SessionHandle> = self
            .call(
                METHOD_START_SESSION,
                json!({ "clientID": id, "channel": channel, "units": units }),
            )
            .await?;
        Ok(handle.unwrap_or_default())
    }

    async fn update_session(&self, channel: &Channel, usage: u64, last: bool) -> Result<()> {
        debug!(channel = %channel, usage, last, "Updating session");
        self.call(
            METHOD_UPDATE_SESSION,
            json!({ "channel": channel, "units": usage, "last": last }),
        )
        .await
    }

    #[instrument(skip(self), fields(channel = %channel))]
    async fn stop_session(&self, channel: &Channel) -> Result<()> {
        self.call(METHOD_STOP_SESSION, json!({ "channel": channel }))
            .await
    }

    #[instrument(skip_all)]
    async fn set_product_config(&self, config: &ProductConfig) -> Result<()> {
        self.call(METHOD_SET_PRODUCT_CONFIG, json!({ "config": config }))
            .await
    }
}
