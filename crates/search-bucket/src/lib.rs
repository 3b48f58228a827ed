use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use search_core::config::{BUCKET_BATCH_SOFT_CAP, FETCH_PAGE_LIMIT, FETCH_RETRY_BACKOFF_MS};
use search_core::host::HostCapabilities;
use search_core::types::{Channel, ChannelId, ChannelMessageReq};
use search_index::MessageIndex;
use search_store::CursorStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

const QUEUE_CAPACITY: usize = 1000;

/// An index hint: "there may be new messages on this channel". Intentionally
/// tiny — duplicate hints coalesce for free because the worker always
/// re-reads the authoritative cursor before fetching.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub channel: Channel,
}

/// A running bucket worker: its id, the sender callers enqueue hints
/// through, and a handle to its consumer task (owned by [`search_engine`]'s
/// `Engine`; the bucket holds no back-reference to the engine, only `Arc`s
/// to the shared store and index).
pub struct BucketHandle {
    pub id: usize,
    tx: mpsc::Sender<IndexRequest>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl BucketHandle {
    /// Non-blocking hint enqueue: never blocks the caller; a full queue
    /// silently drops the hint because a later event will reintroduce it.
    pub fn try_enqueue(&self, channel: Channel) -> bool {
        match self.tx.try_send(IndexRequest { channel }) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Current queue depth, for diagnostics only — never used for
    /// control-flow decisions.
    pub fn pending_len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Signals the consumer loop to stop observing new work and waits for
    /// it to finish whatever batch it is mid-processing. Uses an explicit
    /// cancellation token rather than dropping the channel, because the loop
    /// itself holds a sender clone (for re-enqueue) that would otherwise
    /// keep the channel open forever.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

/// Spawns bucket `id`'s consumer task and returns a handle to it.
pub fn spawn_bucket(
    id: usize,
    store: Arc<CursorStore>,
    index: Arc<MessageIndex>,
    host: Arc<dyn HostCapabilities>,
) -> BucketHandle {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let pending = Arc::new(AtomicUsize::new(0));
    let pending_clone = pending.clone();
    let tx_clone = tx.clone();
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let join = tokio::spawn(loop_index(
        id,
        rx,
        pending_clone,
        tx_clone,
        cancel_clone,
        store,
        index,
        host,
    ));
    BucketHandle {
        id,
        tx,
        pending,
        cancel,
        join,
    }
}

/// Greedy batching with a soft cap:
/// 1. block for one request;
/// 2. drain non-blockingly until empty or `|reqs| > 100`;
/// 3. process the batch;
/// 4. repeat.
///
/// Exits once `cancel` is triggered by [`BucketHandle::stop`] and no request
/// is immediately available, finishing any batch already in flight first.
async fn loop_index(
    id: usize,
    mut rx: mpsc::Receiver<IndexRequest>,
    pending: Arc<AtomicUsize>,
    self_tx: mpsc::Sender<IndexRequest>,
    cancel: CancellationToken,
    store: Arc<CursorStore>,
    index: Arc<MessageIndex>,
    host: Arc<dyn HostCapabilities>,
) {
    loop {
        let first = tokio::select! {
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        pending.fetch_sub(1, Ordering::Relaxed);

        let mut reqs = vec![first];
        loop {
            if reqs.len() > BUCKET_BATCH_SOFT_CAP {
                break;
            }
            match rx.try_recv() {
                Ok(req) => {
                    pending.fetch_sub(1, Ordering::Relaxed);
                    reqs.push(req);
                }
                Err(_) => break,
            }
        }

        handle_index(id, reqs, &store, &index, host.as_ref(), &self_tx, &pending).await;
    }
}

async fn handle_index(
    bucket_id: usize,
    reqs: Vec<IndexRequest>,
    store: &CursorStore,
    index: &MessageIndex,
    host: &dyn HostCapabilities,
    self_tx: &mpsc::Sender<IndexRequest>,
    pending: &AtomicUsize,
) {
    let mut fetches = Vec::with_capacity(reqs.len());
    for req in &reqs {
        let seq = match store.get(&req.channel.channel_id, req.channel.channel_type) {
            Ok(seq) => seq,
            Err(e) => {
                error!(bucket_id, channel_id = %req.channel.channel_id, error = %e, "cursor read failed");
                continue;
            }
        };
        fetches.push(ChannelMessageReq {
            channel_id: req.channel.channel_id.as_str().to_string(),
            channel_type: req.channel.channel_type,
            start_message_seq: seq + 1,
            limit: FETCH_PAGE_LIMIT,
        });
    }

    if fetches.is_empty() {
        return;
    }

    let responses = match host.get_channel_messages(fetches).await {
        Ok(resps) => resps,
        Err(e) => {
            error!(bucket_id, requests = reqs.len(), error = %e, "get_channel_messages failed, batch aborted");
            return;
        }
    };

    if responses.is_empty() {
        warn!(bucket_id, "channel message batch returned empty");
        return;
    }

    for resp in responses {
        if resp.messages.is_empty() {
            continue;
        }
        let channel_id = ChannelId::from(resp.channel_id.clone());

        match index.index_messages(&resp.messages) {
            Ok(_) => {
                let last = resp.messages.last().expect("checked non-empty above");
                if let Err(e) = store.set(&channel_id, resp.channel_type, last.message_seq) {
                    error!(bucket_id, channel_id = %channel_id, error = %e, "cursor write failed");
                }
            }
            Err(e) => {
                error!(bucket_id, channel_id = %channel_id, error = %e, "index batch apply failed, cursor not advanced");
                continue;
            }
        }

        if resp.messages.len() as u32 >= resp.limit {
            tokio::time::sleep(Duration::from_millis(FETCH_RETRY_BACKOFF_MS)).await;
            let channel = Channel::new(channel_id.clone(), resp.channel_type);
            match self_tx.try_send(IndexRequest { channel }) {
                Ok(()) => {
                    pending.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(bucket_id, channel_id = %channel_id, "re-enqueue dropped, queue full");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_core::host::FakeHost;
    use search_core::types::{ChannelMessageResp, Message};

    fn message(id: i64, seq: u64) -> Message {
        Message {
            message_id: id,
            message_idstr: id.to_string(),
            message_seq: seq,
            client_msg_no: String::new(),
            from_uid: "alice".to_string(),
            channel_id: "C1".to_string(),
            channel_type: 1,
            payload: Some(serde_json::json!({"type": 1, "content": "hello"})),
            payload_json: serde_json::json!({"type": 1, "content": "hello"}).to_string(),
            stream_no: String::new(),
            stream_id: 0,
            topic: String::new(),
            timestamp: 1000,
        }
    }

    #[tokio::test]
    async fn indexing_one_channel_advances_cursor_and_is_searchable() {
        let store_dir = tempfile::tempdir().unwrap();
        let index_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CursorStore::open(store_dir.path()).unwrap());
        let index = Arc::new(MessageIndex::open_or_create(index_dir.path()).unwrap());
        let fake_host = Arc::new(FakeHost::new("/tmp"));
        fake_host.push_channel_messages(
            "C1",
            ChannelMessageResp {
                channel_id: "C1".to_string(),
                channel_type: 1,
                messages: vec![message(100, 1)],
                limit: 500,
            },
        );
        let host: Arc<dyn HostCapabilities> = fake_host;

        let bucket = spawn_bucket(0, store.clone(), index.clone(), host.clone());
        assert!(bucket.try_enqueue(Channel::new("C1", 1)));
        // Give the consumer loop a chance to drain and process the request
        // before signalling shutdown, so this test observes the batch
        // outcome rather than racing the cancellation.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bucket.stop().await;

        assert_eq!(store.get(&ChannelId::from("C1"), 1).unwrap(), 1);
    }
}
