use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel type tag meaning "this channel's two participants are individual
/// users" (as opposed to a group, customer-service, or community channel).
/// Any other value is an opaque tag to this crate.
pub const CHANNEL_TYPE_PERSON: u8 = 1;

/// Number of buckets channels are sharded across.
pub const BUCKET_COUNT: u32 = 10;

/// Identifier of a logical message stream. Not tokenized when indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// `(channel_id, channel_type)` pair — the unit of sharding and cursor
/// tracking. `channel_type == 0` means "unset" everywhere in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub channel_type: u8,
}

impl Channel {
    pub fn new(channel_id: impl Into<ChannelId>, channel_type: u8) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type,
        }
    }
}

/// FNV-1a over the channel id, matching the original's `Hash(channelId)`.
/// Deterministic and stable across process restarts (testable property #4).
pub fn hash_channel_id(channel_id: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut hash = FNV_OFFSET;
    for byte in channel_id.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// `bucket(channel_id) = hash(channel_id) mod N`. Deterministic, stable; all
/// index requests for a channel land on the same bucket (testable property #4).
pub fn bucket_index(channel_id: &str) -> usize {
    (hash_channel_id(channel_id) % BUCKET_COUNT) as usize
}

/// Canonical, order-independent id for a person-to-person channel: always
/// the two uids joined with the smaller one first, so
/// `fake_channel_id_with(u, v) == fake_channel_id_with(v, u)` (testable
/// property #7).
pub fn fake_channel_id_with(uid_a: &str, uid_b: &str) -> String {
    if uid_a <= uid_b {
        format!("{uid_a}_{uid_b}")
    } else {
        format!("{uid_b}_{uid_a}")
    }
}

/// Recover the *other* party's uid from a canonical person-channel id, given
/// one of the two participants. Returns `None` if `uid` is not a participant
/// encoded in `fake_id` (malformed or foreign id).
pub fn real_channel_id_for(uid: &str, fake_id: &str) -> Option<String> {
    let (a, b) = fake_id.split_once('_')?;
    if a == uid {
        Some(b.to_string())
    } else if b == uid {
        Some(a.to_string())
    } else {
        None
    }
}

/// A chat message as returned by the host and as materialized from a search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub message_idstr: String,
    pub message_seq: u64,
    pub client_msg_no: String,
    pub from_uid: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub payload: Option<Value>,
    pub payload_json: String,
    pub stream_no: String,
    pub stream_id: u64,
    pub topic: String,
    pub timestamp: u32,
}

/// One per-channel fetch request sent to the host in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessageReq {
    pub channel_id: String,
    pub channel_type: u8,
    pub start_message_seq: u64,
    pub limit: u32,
}

/// The host's response for one channel in a batched fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessageResp {
    pub channel_id: String,
    pub channel_type: u8,
    pub messages: Vec<Message>,
    pub limit: u32,
}

/// A cluster node and the subset of the requested channels it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    pub node_id: String,
    pub channels: Vec<Channel>,
}

/// `POST /search` and (embedded in) `POST /usersearch` request body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchReq {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_type: Option<u8>,
    #[serde(default)]
    pub from_uid: Option<String>,
    #[serde(default)]
    pub payload: HashMap<String, String>,
    #[serde(default)]
    pub payload_types: Vec<i64>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub start_time: Option<u32>,
    #[serde(default)]
    pub end_time: Option<u32>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// `POST /usersearch` request body: a [`SearchReq`] plus the target user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSearchReq {
    pub uid: String,
    #[serde(flatten)]
    pub base: SearchReq,
}

/// Response shared by `/search` and `/usersearch`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResp {
    pub cost: u64,
    pub total: u64,
    pub limit: u32,
    pub page: u32,
    pub messages: Vec<Message>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_is_deterministic_and_stable() {
        let a = bucket_index("channel-42");
        let b = bucket_index("channel-42");
        assert_eq!(a, b);
        assert!(a < BUCKET_COUNT as usize);
    }

    #[test]
    fn fake_channel_id_is_order_independent() {
        assert_eq!(
            fake_channel_id_with("alice", "bob"),
            fake_channel_id_with("bob", "alice")
        );
    }

    #[test]
    fn real_channel_id_round_trips() {
        let fake = fake_channel_id_with("alice", "bob");
        assert_eq!(real_channel_id_for("alice", &fake).as_deref(), Some("bob"));
        assert_eq!(real_channel_id_for("bob", &fake).as_deref(), Some("alice"));
        assert_eq!(real_channel_id_for("carol", &fake), None);
    }

    #[test]
    fn usersearch_req_flattens_base_fields() {
        let json = serde_json::json!({
            "uid": "alice",
            "channel_id": "bob",
            "channel_type": 1,
            "limit": 20
        });
        let req: UserSearchReq = serde_json::from_value(json).unwrap();
        assert_eq!(req.uid, "alice");
        assert_eq!(req.base.channel_id.as_deref(), Some("bob"));
        assert_eq!(req.base.limit, 20);
    }
}
