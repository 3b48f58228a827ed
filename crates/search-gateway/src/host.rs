use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use search_core::config::{HostClientConfig, StorageConfig};
use search_core::error::{Result, SearchError};
use search_core::host::HostCapabilities;
use search_core::types::{Channel, ChannelMessageReq, ChannelMessageResp, NodeGroup};
use serde::Serialize;
use tracing::warn;

/// Talks to the plugin host's RPC surface over HTTP. Production counterpart
/// to [`search_core::host::FakeHost`]; every method mirrors one entry of the
/// `HostCapabilities` contract as a single JSON request/response round trip.
pub struct RpcHost {
    client: reqwest::Client,
    base_url: String,
    sandbox_dir: PathBuf,
}

impl RpcHost {
    pub fn new(host: HostClientConfig, storage: StorageConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(host.timeout_ms))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build configured reqwest client, using default");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: host.base_url,
            sandbox_dir: PathBuf::from(storage.sandbox_dir),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Serialize)]
struct ForwardHttpBody<'a> {
    plugin_no: &'a str,
    to_node_id: &'a str,
    method: &'a str,
    path: &'a str,
    headers: &'a HashMap<String, String>,
    body: Vec<u8>,
}

#[async_trait]
impl HostCapabilities for RpcHost {
    async fn get_channel_messages(
        &self,
        reqs: Vec<ChannelMessageReq>,
    ) -> Result<Vec<ChannelMessageResp>> {
        let resp = self
            .client
            .post(self.url("/rpc/channel_messages"))
            .json(&reqs)
            .send()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SearchError::HostRpc(format!(
                "get_channel_messages: host returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))
    }

    async fn conversation_channels(&self, uid: &str) -> Result<Vec<Channel>> {
        let resp = self
            .client
            .get(self.url("/rpc/conversation_channels"))
            .query(&[("uid", uid)])
            .send()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SearchError::HostRpc(format!(
                "conversation_channels: host returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))
    }

    async fn cluster_channel_belong_node(&self, channels: &[Channel]) -> Result<Vec<NodeGroup>> {
        let resp = self
            .client
            .post(self.url("/rpc/cluster_channel_belong_node"))
            .json(channels)
            .send()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SearchError::HostRpc(format!(
                "cluster_channel_belong_node: host returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))
    }

    async fn forward_http(
        &self,
        plugin_no: &str,
        to_node_id: &str,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(self.url("/rpc/forward_http"))
            .json(&ForwardHttpBody {
                plugin_no,
                to_node_id,
                method,
                path,
                headers,
                body,
            })
            .send()
            .await
            .map_err(|e| SearchError::HostRpc(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SearchError::HostRpc(format!(
                "forward_http to {to_node_id}: host returned {}",
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| SearchError::HostRpc(e.to_string()))
    }

    fn sandbox_dir(&self) -> PathBuf {
        self.sandbox_dir.clone()
    }
}
