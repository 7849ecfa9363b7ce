//! Adapter configuration
//!
//! Loaded from a JSON or TOML file (format by extension) and layered with
//! `METERBRIDGE__SECTION__KEY` environment overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use meterbridge_common::{BridgeError, Result, DEFAULT_COUNT_PERIOD_SECS};

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "METERBRIDGE";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "meterbridge-adapter", version, about = "Bridges billing connection changes to a v2ray proxy")]
pub struct CliArgs {
    /// Configuration file
    #[arg(short, long, env = "METERBRIDGE_CONFIG", default_value = "config.json")]
    pub config: PathBuf,
}

/// Which side of the proxy connection this adapter drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    /// Serving side, many concurrent sessions
    Agent,
    /// Consuming side, one active session at a time
    Client,
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleKind::Agent => write!(f, "agent"),
            RoleKind::Client => write!(f, "client"),
        }
    }
}

/// Top-level adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Explicit role; inferred from `proxy.inbound_port` when absent
    pub role: Option<RoleKind>,
    /// Directory holding the durable markers
    pub data_dir: Option<PathBuf>,
    pub session: SessionSettings,
    pub proxy: ProxySettings,
    pub monitor: MonitorSettings,
    pub log: LogSettings,
    pub metrics: MetricsSettings,
}

/// Billing/session controller connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// NATS server URL
    pub url: String,
    /// Origin this adapter authenticates as
    pub origin: String,
    /// Product identifier
    pub product: String,
    /// Product password
    pub password: String,
    /// Subject prefix for requests and the connection-change subscription
    pub subject_prefix: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            origin: String::new(),
            product: String::new(),
            password: String::new(),
            subject_prefix: "sess".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl SessionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Proxy engine API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// v2ray API endpoint
    pub api: String,
    /// Tag of the inbound users are added to (agent) or metered on (client)
    pub inbound_tag: String,
    /// Inbound port published to consumers; non-zero selects the agent role
    pub inbound_port: u16,
    /// vmess alter id of provisioned users
    pub alter_id: u32,
    /// Address published to consumers; looked up when absent
    pub external_address: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            api: "http://127.0.0.1:10085".to_string(),
            inbound_tag: "vmess".to_string(),
            inbound_port: 0,
            alter_id: 64,
            external_address: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Usage polling period in seconds
    pub count_period_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            count_period_secs: DEFAULT_COUNT_PERIOD_SECS,
        }
    }
}

impl MonitorSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.count_period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Directory for daily rolling log files
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Listen address of the `/metrics` endpoint; disabled when absent
    pub listen: Option<SocketAddr>,
}

impl AdapterConfig {
    /// Load configuration from `path` and the environment
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;

        let mut cfg: Self = settings
            .try_deserialize()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        if cfg.data_dir.is_none() {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            cfg.data_dir = Some(dir.to_path_buf());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Effective role
    pub fn role(&self) -> RoleKind {
        match self.role {
            Some(role) => role,
            None if self.proxy.inbound_port > 0 => RoleKind::Agent,
            None => RoleKind::Client,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// Reject settings the adapter cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.monitor.count_period_secs == 0 {
            return Err(BridgeError::Config(
                "monitor.count_period_secs must be positive".into(),
            ));
        }
        if self.proxy.api.trim().is_empty() {
            return Err(BridgeError::Config("proxy.api must be set".into()));
        }
        if self.proxy.inbound_tag.trim().is_empty() {
            return Err(BridgeError::Config("proxy.inbound_tag must be set".into()));
        }
        if self.session.product.trim().is_empty() {
            return Err(BridgeError::Config("session.product must be set".into()));
        }
        if self.role() == RoleKind::Agent && self.proxy.inbound_port == 0 {
            return Err(BridgeError::Config(
                "agent role requires proxy.inbound_port".into(),
            ));
        }
        Ok(())
    }
}
