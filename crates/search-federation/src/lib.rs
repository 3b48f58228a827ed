use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use search_core::config::FEDERATION_DEADLINE_MS;
use search_core::error::{Result, SearchError};
use search_core::host::HostCapabilities;
use search_core::types::{
    real_channel_id_for, SearchReq, SearchResp, UserSearchReq, CHANNEL_TYPE_PERSON,
};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 1000;

#[derive(Default)]
struct Accumulator {
    messages: Vec<search_core::types::Message>,
    max_cost: u64,
    max_total: u64,
}

/// Fans a `/usersearch` out to every cluster node that owns one of the
/// target user's channels, merges the results, and re-ranks by recency
/// under an overall fan-out deadline.
pub struct Coordinator {
    host: Arc<dyn HostCapabilities>,
    plugin_no: String,
}

impl Coordinator {
    pub fn new(host: Arc<dyn HostCapabilities>, plugin_no: impl Into<String>) -> Self {
        Self {
            host,
            plugin_no: plugin_no.into(),
        }
    }

    pub async fn usersearch(&self, req: UserSearchReq) -> Result<SearchResp> {
        let uid = req.uid;
        let mut base = req.base;
        clamp_limit(&mut base);
        canonicalize_person_channel(&uid, &mut base);

        let channels = self.host.conversation_channels(&uid).await?;
        if channels.is_empty() {
            return Ok(empty_response(&base));
        }

        let groups = self.host.cluster_channel_belong_node(&channels).await?;
        let groups: Vec<_> = groups.into_iter().filter(|g| !g.channels.is_empty()).collect();
        if groups.is_empty() {
            return Ok(empty_response(&base));
        }

        let accumulator = Arc::new(Mutex::new(Accumulator::default()));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for group in groups {
            let mut node_req = base.clone();
            node_req.channels = group.channels;
            tasks.spawn(fan_out_one(
                self.host.clone(),
                self.plugin_no.clone(),
                group.node_id,
                uid.clone(),
                node_req,
                accumulator.clone(),
                cancel.clone(),
            ));
        }

        let joined = tokio::time::timeout(Duration::from_millis(FEDERATION_DEADLINE_MS), async {
            let mut first_err = None;
            while let Some(outcome) = tasks.join_next().await {
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        first_err.get_or_insert(e);
                    }
                    Err(join_err) => {
                        first_err.get_or_insert(SearchError::Federation(join_err.to_string()));
                    }
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await;

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => {
                cancel.cancel();
                while tasks.join_next().await.is_some() {}
                return Err(SearchError::DeadlineExceeded { ms: FEDERATION_DEADLINE_MS });
            }
        }

        let mut acc = Arc::try_unwrap(accumulator)
            .unwrap_or_else(|_arc| {
                warn!("federation accumulator still shared after join, discarding merged state");
                Mutex::new(Accumulator::default())
            })
            .into_inner();
        acc.messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        acc.messages.truncate(base.limit as usize);

        Ok(SearchResp {
            cost: acc.max_cost,
            total: acc.max_total,
            limit: base.limit,
            page: page_of(&base),
            messages: acc.messages,
        })
    }
}

fn clamp_limit(req: &mut SearchReq) {
    if req.limit == 0 {
        req.limit = DEFAULT_LIMIT;
    } else if req.limit > MAX_LIMIT {
        req.limit = MAX_LIMIT;
    }
}

fn canonicalize_person_channel(uid: &str, req: &mut SearchReq) {
    if req.channel_type == Some(CHANNEL_TYPE_PERSON) {
        if let Some(channel_id) = &req.channel_id {
            req.channel_id = Some(search_core::types::fake_channel_id_with(uid, channel_id));
        }
    }
}

fn page_of(req: &SearchReq) -> u32 {
    if req.page > 0 {
        req.page
    } else {
        1
    }
}

fn empty_response(req: &SearchReq) -> SearchResp {
    SearchResp {
        cost: 0,
        total: 0,
        limit: req.limit,
        page: page_of(req),
        messages: Vec::new(),
    }
}

async fn fan_out_one(
    host: Arc<dyn HostCapabilities>,
    plugin_no: String,
    node_id: String,
    uid: String,
    node_req: SearchReq,
    accumulator: Arc<Mutex<Accumulator>>,
    cancel: CancellationToken,
) -> Result<()> {
    let call = async {
        let body = serde_json::to_vec(&node_req)?;
        let headers = HashMap::new();
        let bytes = host
            .forward_http(&plugin_no, &node_id, "POST", "/search", &headers, body)
            .await?;
        let resp: SearchResp = serde_json::from_slice(&bytes)?;

        let mut messages = resp.messages;
        for message in &mut messages {
            if message.channel_type == CHANNEL_TYPE_PERSON {
                if let Some(other) = real_channel_id_for(&uid, &message.channel_id) {
                    message.channel_id = other;
                }
            }
        }

        let mut guard = accumulator.lock().await;
        guard.messages.extend(messages);
        guard.max_cost = guard.max_cost.max(resp.cost);
        guard.max_total = guard.max_total.max(resp.total);
        Ok(())
    };

    tokio::select! {
        res = call => res,
        _ = cancel.cancelled() => Err(SearchError::DeadlineExceeded { ms: FEDERATION_DEADLINE_MS }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_core::host::FakeHost;
    use search_core::types::{Channel, ChannelMessageResp, Message, NodeGroup};

    fn message(id: i64, channel_id: &str, channel_type: u8, ts: u32) -> Message {
        Message {
            message_id: id,
            message_idstr: id.to_string(),
            message_seq: 1,
            client_msg_no: String::new(),
            from_uid: "alice".to_string(),
            channel_id: channel_id.to_string(),
            channel_type,
            payload: Some(serde_json::json!({"content": "hi"})),
            payload_json: "{}".to_string(),
            stream_no: String::new(),
            stream_id: 0,
            topic: String::new(),
            timestamp: ts,
        }
    }

    fn search_resp(messages: Vec<Message>, cost: u64, total: u64) -> SearchResp {
        SearchResp { cost, total, limit: 20, page: 1, messages }
    }

    /// S5: messages from two nodes merge, sort by `-timestamp`, and truncate to `limit`.
    #[tokio::test]
    async fn s5_federated_fan_out_merges_and_sorts() {
        let fake_host = Arc::new(FakeHost::new("/tmp/federation-test"));
        fake_host.set_conversation_channels(
            "alice",
            vec![
                Channel::new("C1", 0),
                Channel::new("C2", 0),
            ],
        );
        fake_host.set_node_groups(vec![
            NodeGroup { node_id: "node-a".to_string(), channels: vec![Channel::new("C1", 0)] },
            NodeGroup { node_id: "node-b".to_string(), channels: vec![Channel::new("C2", 0)] },
        ]);
        fake_host.set_forward_response(
            "node-a",
            serde_json::to_vec(&search_resp(vec![message(1, "C1", 0, 100)], 10, 1)).unwrap(),
        );
        fake_host.set_forward_response(
            "node-b",
            serde_json::to_vec(&search_resp(vec![message(2, "C2", 0, 200)], 20, 1)).unwrap(),
        );
        let host: Arc<dyn HostCapabilities> = fake_host;

        let coordinator = Coordinator::new(host, "search");
        let resp = coordinator
            .usersearch(UserSearchReq {
                uid: "alice".to_string(),
                base: SearchReq::default(),
            })
            .await
            .unwrap();

        assert_eq!(resp.messages.len(), 2);
        assert_eq!(resp.messages[0].message_id, 2);
        assert_eq!(resp.messages[1].message_id, 1);
        assert_eq!(resp.cost, 20);
        assert_eq!(resp.total, 1);
    }

    /// S6: a person-channel result id round-trips back to the other party's uid.
    #[tokio::test]
    async fn s6_person_channel_round_trips_in_results() {
        let fake_host = Arc::new(FakeHost::new("/tmp/federation-test"));
        let canonical = search_core::types::fake_channel_id_with("alice", "bob");
        fake_host.set_conversation_channels(
            "alice",
            vec![Channel::new(canonical.clone(), CHANNEL_TYPE_PERSON)],
        );
        fake_host.set_node_groups(vec![NodeGroup {
            node_id: "node-a".to_string(),
            channels: vec![Channel::new(canonical.clone(), CHANNEL_TYPE_PERSON)],
        }]);
        fake_host.set_forward_response(
            "node-a",
            serde_json::to_vec(&search_resp(
                vec![message(1, &canonical, CHANNEL_TYPE_PERSON, 100)],
                5,
                1,
            ))
            .unwrap(),
        );
        let host: Arc<dyn HostCapabilities> = fake_host;

        let coordinator = Coordinator::new(host, "search");
        let resp = coordinator
            .usersearch(UserSearchReq {
                uid: "alice".to_string(),
                base: SearchReq {
                    channel_id: Some("bob".to_string()),
                    channel_type: Some(CHANNEL_TYPE_PERSON),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        assert_eq!(resp.messages.len(), 1);
        assert_eq!(resp.messages[0].channel_id, "bob");
    }

    #[tokio::test]
    async fn empty_conversation_channels_returns_empty_result() {
        let fake_host = Arc::new(FakeHost::new("/tmp/federation-test"));
        let host: Arc<dyn HostCapabilities> = fake_host;
        let coordinator = Coordinator::new(host, "search");
        let resp = coordinator
            .usersearch(UserSearchReq {
                uid: "alice".to_string(),
                base: SearchReq::default(),
            })
            .await
            .unwrap();
        assert!(resp.messages.is_empty());
    }

    #[test]
    fn clamp_limit_applies_default_and_ceiling() {
        let mut req = SearchReq::default();
        clamp_limit(&mut req);
        assert_eq!(req.limit, DEFAULT_LIMIT);

        let mut req = SearchReq { limit: 5_000, ..Default::default() };
        clamp_limit(&mut req);
        assert_eq!(req.limit, MAX_LIMIT);
    }
}
