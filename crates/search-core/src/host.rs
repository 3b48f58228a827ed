use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Channel, ChannelMessageReq, ChannelMessageResp, NodeGroup};

/// Everything this crate needs from the plugin host runtime, injected rather
/// than reached for as an ambient global. Production code implements this
/// against the real host RPC surface; tests substitute [`FakeHost`].
#[async_trait]
pub trait HostCapabilities: Send + Sync {
    /// Batched per-channel message fetch. One entry in, one entry out, in
    /// the same relative order is not guaranteed — callers key responses by
    /// `channel_id`.
    async fn get_channel_messages(
        &self,
        reqs: Vec<ChannelMessageReq>,
    ) -> Result<Vec<ChannelMessageResp>>;

    /// The full set of channels a user currently participates in.
    async fn conversation_channels(&self, uid: &str) -> Result<Vec<Channel>>;

    /// Groups a channel set by the cluster node that owns each channel.
    async fn cluster_channel_belong_node(&self, channels: &[Channel]) -> Result<Vec<NodeGroup>>;

    /// Forwards an HTTP request to another cluster node on this plugin's
    /// behalf, returning the raw response body.
    async fn forward_http(
        &self,
        plugin_no: &str,
        to_node_id: &str,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>>;

    /// Per-plugin persistent-state directory.
    fn sandbox_dir(&self) -> PathBuf;

    /// Canonical, order-independent person-channel id. Pure function;
    /// delegates to [`crate::types::fake_channel_id_with`] by default so a
    /// real host implementation only needs to override this if the platform
    /// computes it differently.
    fn get_fake_channel_id_with(&self, uid_a: &str, uid_b: &str) -> String {
        crate::types::fake_channel_id_with(uid_a, uid_b)
    }
}

/// Scripted response queue + call log, for deterministic unit and
/// integration tests without any network or external process.
pub struct FakeHost {
    sandbox_dir: PathBuf,
    channel_messages: Mutex<HashMap<String, Vec<ChannelMessageResp>>>,
    conversation_channels: Mutex<HashMap<String, Vec<Channel>>>,
    node_groups: Mutex<Vec<NodeGroup>>,
    forward_responses: Mutex<HashMap<String, Vec<u8>>>,
    pub forward_calls: Mutex<Vec<(String, SearchReqSnapshot)>>,
}

/// A minimal snapshot of a forwarded `/search` body, kept for test
/// assertions about fan-out without pulling `search-core`'s consumers into a
/// dependency on the wire type used by the caller.
#[derive(Debug, Clone, Default)]
pub struct SearchReqSnapshot {
    pub channels: Vec<Channel>,
}

impl FakeHost {
    pub fn new(sandbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_dir: sandbox_dir.into(),
            channel_messages: Mutex::new(HashMap::new()),
            conversation_channels: Mutex::new(HashMap::new()),
            node_groups: Mutex::new(Vec::new()),
            forward_responses: Mutex::new(HashMap::new()),
            forward_calls: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue the response `get_channel_messages` should return the *next*
    /// time this channel is fetched. Subsequent fetches for the same channel
    /// return empty unless another response is queued.
    pub fn push_channel_messages(&self, channel_id: &str, resp: ChannelMessageResp) {
        self.channel_messages
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default()
            .push(resp);
    }

    pub fn set_conversation_channels(&self, uid: &str, channels: Vec<Channel>) {
        self.conversation_channels
            .lock()
            .unwrap()
            .insert(uid.to_string(), channels);
    }

    pub fn set_node_groups(&self, groups: Vec<NodeGroup>) {
        *self.node_groups.lock().unwrap() = groups;
    }

    pub fn set_forward_response(&self, node_id: &str, body: Vec<u8>) {
        self.forward_responses
            .lock()
            .unwrap()
            .insert(node_id.to_string(), body);
    }
}

#[async_trait]
impl HostCapabilities for FakeHost {
    async fn get_channel_messages(
        &self,
        reqs: Vec<ChannelMessageReq>,
    ) -> Result<Vec<ChannelMessageResp>> {
        let mut queue = self.channel_messages.lock().unwrap();
        let mut out = Vec::with_capacity(reqs.len());
        for req in reqs {
            let resp = queue
                .get_mut(&req.channel_id)
                .and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) })
                .unwrap_or(ChannelMessageResp {
                    channel_id: req.channel_id,
                    channel_type: req.channel_type,
                    messages: Vec::new(),
                    limit: req.limit,
                });
            out.push(resp);
        }
        Ok(out)
    }

    async fn conversation_channels(&self, uid: &str) -> Result<Vec<Channel>> {
        Ok(self
            .conversation_channels
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .unwrap_or_default())
    }

    async fn cluster_channel_belong_node(&self, channels: &[Channel]) -> Result<Vec<NodeGroup>> {
        let groups = self.node_groups.lock().unwrap();
        let wanted: std::collections::HashSet<_> = channels.iter().collect();
        Ok(groups
            .iter()
            .filter_map(|g| {
                let channels: Vec<Channel> = g
                    .channels
                    .iter()
                    .filter(|c| wanted.contains(c))
                    .cloned()
                    .collect();
                if channels.is_empty() {
                    None
                } else {
                    Some(NodeGroup {
                        node_id: g.node_id.clone(),
                        channels,
                    })
                }
            })
            .collect())
    }

    async fn forward_http(
        &self,
        _plugin_no: &str,
        to_node_id: &str,
        _method: &str,
        _path: &str,
        _headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        if let Ok(snapshot) = serde_json::from_slice::<crate::types::SearchReq>(&body) {
            self.forward_calls.lock().unwrap().push((
                to_node_id.to_string(),
                SearchReqSnapshot {
                    channels: snapshot.channels,
                },
            ));
        }
        Ok(self
            .forward_responses
            .lock()
            .unwrap()
            .get(to_node_id)
            .cloned()
            .unwrap_or_default())
    }

    fn sandbox_dir(&self) -> PathBuf {
        self.sandbox_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_host_returns_empty_when_nothing_queued() {
        let host = FakeHost::new("/tmp/search-plugin-test");
        let resp = host
            .get_channel_messages(vec![ChannelMessageReq {
                channel_id: "C1".into(),
                channel_type: 1,
                start_message_seq: 1,
                limit: 500,
            }])
            .await
            .unwrap();
        assert_eq!(resp.len(), 1);
        assert!(resp[0].messages.is_empty());
    }

    #[tokio::test]
    async fn fake_host_replays_queued_responses_in_order() {
        let host = FakeHost::new("/tmp/search-plugin-test");
        host.push_channel_messages(
            "C1",
            ChannelMessageResp {
                channel_id: "C1".into(),
                channel_type: 1,
                messages: vec![],
                limit: 500,
            },
        );
        let reqs = vec![ChannelMessageReq {
            channel_id: "C1".into(),
            channel_type: 1,
            start_message_seq: 1,
            limit: 500,
        }];
        let first = host.get_channel_messages(reqs.clone()).await.unwrap();
        let second = host.get_channel_messages(reqs).await.unwrap();
        assert_eq!(first[0].channel_id, "C1");
        assert!(second[0].messages.is_empty());
    }
}
