use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 7780;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Soft cap on entries drained into one bucket batch pass.
pub const BUCKET_BATCH_SOFT_CAP: usize = 100;
/// Page size used when the bucket worker fetches new messages from the host.
pub const FETCH_PAGE_LIMIT: u32 = 500;
/// Pause before re-enqueueing a channel that returned a full page, bounding
/// catch-up throughput to roughly `FETCH_PAGE_LIMIT` messages/second/channel.
pub const FETCH_RETRY_BACKOFF_MS: u64 = 500;
/// Deadline for one federated `/usersearch` fan-out.
pub const FEDERATION_DEADLINE_MS: u64 = 5_000;

/// Top-level config (`search.toml` + `SEARCH_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub host: HostClientConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            host: HostClientConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Where persisted state lives under the plugin sandbox directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sandbox_dir")]
    pub sandbox_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: default_sandbox_dir(),
        }
    }
}

/// How this process reaches the plugin host's RPC surface (`forward_http`,
/// `get_channel_messages`, etc.) when running against a real host rather
/// than `FakeHost`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostClientConfig {
    #[serde(default = "default_host_base_url")]
    pub base_url: String,
    #[serde(default = "default_host_timeout_ms")]
    pub timeout_ms: u64,
    /// This plugin's own identifier, as registered with the host; passed
    /// through to `forward_http` so the receiving node can route the
    /// forwarded request back to the same plugin.
    #[serde(default = "default_plugin_no")]
    pub plugin_no: String,
}

impl Default for HostClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_host_base_url(),
            timeout_ms: default_host_timeout_ms(),
            plugin_no: default_plugin_no(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_sandbox_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.search-plugin")
}
fn default_host_base_url() -> String {
    "http://127.0.0.1:5001".to_string()
}
fn default_host_timeout_ms() -> u64 {
    10_000
}
fn default_plugin_no() -> String {
    "search".to_string()
}

impl SearchConfig {
    /// Load config from a TOML file with `SEARCH_*` env var overrides.
    /// Falls back to in-code defaults when the file is absent.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SearchConfig = Figment::from(figment::providers::Serialized::defaults(
            SearchConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("SEARCH_").split("_"))
        .extract()
        .map_err(|e| crate::error::SearchError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.search-plugin/search.toml")
}
