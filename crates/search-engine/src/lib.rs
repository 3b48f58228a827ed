use std::sync::Arc;

use search_bucket::{spawn_bucket, BucketHandle};
use search_core::error::{Result, SearchError};
use search_core::host::HostCapabilities;
use search_core::types::{bucket_index, Channel, SearchReq, SearchResp, BUCKET_COUNT};
use search_index::MessageIndex;
use search_store::CursorStore;
use tracing::info;

const CURSOR_DIR: &str = "db";
const MESSAGE_INDEX_DIR: &str = "message_index";

/// Shards channels across N buckets and exposes the four top-level
/// operations: start, make_index, persist_after, search. Owns the cursor
/// store, the full-text index, and the bucket workers; no bucket owns the
/// engine back (cycle-free ownership).
pub struct Engine {
    host: Arc<dyn HostCapabilities>,
    store: Option<Arc<CursorStore>>,
    index: Option<Arc<MessageIndex>>,
    buckets: Vec<BucketHandle>,
}

impl Engine {
    /// Allocates the engine. Buckets are not spawned and no storage is
    /// opened until [`Engine::start`] — matching the Go original's `New`
    /// (which does open storage eagerly) only loosely: here `new` is the
    /// pure allocation step and `start` is the fallible I/O step, so
    /// construction can never fail.
    pub fn new(host: Arc<dyn HostCapabilities>) -> Self {
        Self {
            host,
            store: None,
            index: None,
            buckets: Vec::new(),
        }
    }

    /// Opens the cursor store and the full-text index under
    /// `host.sandbox_dir()`, then spawns the N bucket workers. Failure to
    /// open either store is fatal to the caller.
    pub async fn start(&mut self) -> Result<()> {
        let sandbox = self.host.sandbox_dir();
        let store = Arc::new(
            CursorStore::open(sandbox.join(CURSOR_DIR))
                .map_err(|e| SearchError::Store(e.to_string()))?,
        );
        let index = Arc::new(
            MessageIndex::open_or_create(sandbox.join(MESSAGE_INDEX_DIR))
                .map_err(|e| SearchError::Index(e.to_string()))?,
        );

        let mut buckets = Vec::with_capacity(BUCKET_COUNT as usize);
        for id in 0..BUCKET_COUNT as usize {
            buckets.push(spawn_bucket(
                id,
                store.clone(),
                index.clone(),
                self.host.clone(),
            ));
        }

        info!(bucket_count = buckets.len(), "search engine started");
        self.store = Some(store);
        self.index = Some(index);
        self.buckets = buckets;
        Ok(())
    }

    /// Non-blocking hint: "there may be new messages on this channel".
    /// Never blocks the caller; each call is a hint, not a promise — the
    /// owning bucket re-reads the authoritative cursor before fetching.
    /// Tolerates out-of-order `persist_after` delivery by construction:
    /// duplicate or out-of-order hints for the same channel only ever cause
    /// extra, harmless RPCs that return zero new messages.
    pub fn make_index(&self, channel_id: impl Into<String>, channel_type: u8) {
        let channel_id = channel_id.into();
        let idx = bucket_index(&channel_id);
        if let Some(bucket) = self.buckets.get(idx) {
            bucket.try_enqueue(Channel::new(channel_id, channel_type));
        }
    }

    /// Host callback: one `make_index` hint per message in the batch.
    pub fn persist_after(&self, channels: impl IntoIterator<Item = Channel>) {
        for channel in channels {
            self.make_index(channel.channel_id.as_str().to_string(), channel.channel_type);
        }
    }

    /// Index readiness, for `GET /healthz`. `None` before `start()`.
    pub fn health(&self) -> Option<search_index::IndexHealth> {
        self.index.as_ref().map(|index| index.health())
    }

    pub fn search(&self, req: &SearchReq) -> Result<SearchResp> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| SearchError::Internal("engine not started".to_string()))?;

        let hits = index
            .search(req)
            .map_err(|e| SearchError::Index(e.to_string()))?;

        let page = if req.page > 0 { req.page } else { 1 };
        let limit = if req.limit == 0 { 20 } else { req.limit };

        Ok(SearchResp {
            cost: hits.cost_micros,
            total: hits.total,
            limit,
            page,
            messages: hits.hits.into_iter().map(|h| h.message).collect(),
        })
    }

    /// Closes the cursor store, stops every bucket worker, and drops the
    /// index handle (committing and releasing its writer/reader).
    pub async fn stop(&mut self) {
        for bucket in self.buckets.drain(..) {
            bucket.stop().await;
        }
        self.index = None;
        if let Some(store) = self.store.take() {
            if let Ok(store) = Arc::try_unwrap(store) {
                let _ = store.close();
            }
        }
        info!("search engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_core::host::FakeHost;
    use search_core::types::{ChannelMessageResp, Message};
    use std::time::Duration;

    fn message(id: i64, seq: u64, content: &str, ts: u32) -> Message {
        Message {
            message_id: id,
            message_idstr: id.to_string(),
            message_seq: seq,
            client_msg_no: String::new(),
            from_uid: "alice".to_string(),
            channel_id: "C1".to_string(),
            channel_type: 1,
            payload: Some(serde_json::json!({"type": 1, "content": content})),
            payload_json: serde_json::json!({"type": 1, "content": content}).to_string(),
            stream_no: String::new(),
            stream_id: 0,
            topic: String::new(),
            timestamp: ts,
        }
    }

    /// Index one channel, then find it by search.
    #[tokio::test]
    async fn s1_index_one_channel_then_search() {
        let dir = tempfile::tempdir().unwrap();
        let fake_host = Arc::new(FakeHost::new(dir.path()));
        fake_host.push_channel_messages(
            "C1",
            ChannelMessageResp {
                channel_id: "C1".to_string(),
                channel_type: 1,
                messages: vec![message(100, 1, "hello", 1000)],
                limit: 500,
            },
        );
        let host: Arc<dyn HostCapabilities> = fake_host;

        let mut engine = Engine::new(host.clone());
        engine.start().await.unwrap();
        engine.make_index("C1", 1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let req = SearchReq {
            channel_id: Some("C1".to_string()),
            ..Default::default()
        };
        let resp = engine.search(&req).unwrap();
        assert_eq!(resp.messages.len(), 1);
        assert_eq!(resp.messages[0].message_id, 100);
        engine.stop().await;
    }

    /// S2: a full page (500 messages) triggers a cursor advance and a
    /// second fetch without another external `make_index` call.
    #[tokio::test]
    async fn s2_cursor_advance_and_reenqueue() {
        let dir = tempfile::tempdir().unwrap();
        let fake_host = Arc::new(FakeHost::new(dir.path()));
        let first_batch: Vec<Message> = (1..=500)
            .map(|seq| message(seq as i64, seq, "m", 1000))
            .collect();
        fake_host.push_channel_messages(
            "C1",
            ChannelMessageResp {
                channel_id: "C1".to_string(),
                channel_type: 1,
                messages: first_batch,
                limit: 500,
            },
        );
        let second_batch: Vec<Message> = (501..=550)
            .map(|seq| message(seq as i64, seq, "m", 1000))
            .collect();
        fake_host.push_channel_messages(
            "C1",
            ChannelMessageResp {
                channel_id: "C1".to_string(),
                channel_type: 1,
                messages: second_batch,
                limit: 500,
            },
        );
        let host: Arc<dyn HostCapabilities> = fake_host;

        let mut engine = Engine::new(host.clone());
        engine.start().await.unwrap();
        engine.make_index("C1", 1);
        // 500ms backoff + processing time for both rounds.
        tokio::time::sleep(Duration::from_millis(900)).await;

        let store = engine.store.as_ref().unwrap();
        assert_eq!(
            store
                .get(&search_core::types::ChannelId::from("C1"), 1)
                .unwrap(),
            550
        );
        engine.stop().await;
    }
}
