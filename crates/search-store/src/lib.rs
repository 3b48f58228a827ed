mod error;

pub use error::{Result, StoreError};

use std::path::Path;

use search_core::types::ChannelId;
use tracing::debug;

const CURSOR_PREFIX: &str = "channel_msg_max_seq:";

/// Durable, ordered key-value store for per-channel index cursors. Keys are
/// `"channel_msg_max_seq:" + channel_id + ":" + channel_type`; values are
/// 8-byte big-endian `u64`.
pub struct CursorStore {
    db: sled::Db,
}

impl CursorStore {
    /// Opens (creating if absent) the cursor store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|source| StoreError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { db })
    }

    /// Returns the highest indexed `message_seq` for the channel, or `0` if
    /// no cursor has ever been written (testable property #1: the cursor
    /// never decreases from this floor).
    pub fn get(&self, channel_id: &ChannelId, channel_type: u8) -> Result<u64> {
        let key = cursor_key(channel_id, channel_type);
        match self.db.get(&key)? {
            Some(bytes) => decode_seq(&key, &bytes),
            None => Ok(0),
        }
    }

    /// Durably (fsync'd) records the cursor. At-least-once semantics are
    /// fine because every write is idempotent — callers always write the
    /// authoritative max, never a delta.
    pub fn set(&self, channel_id: &ChannelId, channel_type: u8, seq: u64) -> Result<()> {
        let key = cursor_key(channel_id, channel_type);
        self.db.insert(&key, &seq.to_be_bytes())?;
        self.db.flush()?;
        debug!(channel_id = %channel_id, channel_type, seq, "cursor advanced");
        Ok(())
    }

    /// Ordered iteration over every known cursor. Used by diagnostics and by
    /// tests asserting the monotone-cursor invariant holds across a whole run.
    pub fn iter_cursors(&self) -> impl Iterator<Item = Result<(ChannelId, u8, u64)>> + '_ {
        self.db
            .scan_prefix(CURSOR_PREFIX.as_bytes())
            .map(|entry| {
                let (key, value) = entry?;
                let key_str = String::from_utf8_lossy(&key).into_owned();
                let seq = decode_seq(&key_str, &value)?;
                let (channel_id, channel_type) = parse_cursor_key(&key_str)
                    .ok_or_else(|| StoreError::CorruptValue {
                        key: key_str.clone(),
                        len: value.len(),
                    })?;
                Ok((channel_id, channel_type, seq))
            })
    }

    /// Closes the store. `sled::Db` flushes on drop, but this makes the
    /// scoped-lifecycle contract explicit.
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn cursor_key(channel_id: &ChannelId, channel_type: u8) -> Vec<u8> {
    format!("{CURSOR_PREFIX}{channel_id}:{channel_type}").into_bytes()
}

fn parse_cursor_key(key: &str) -> Option<(ChannelId, u8)> {
    let rest = key.strip_prefix(CURSOR_PREFIX)?;
    let (channel_id, channel_type) = rest.rsplit_once(':')?;
    let channel_type: u8 = channel_type.parse().ok()?;
    Some((ChannelId::from(channel_id), channel_type))
}

fn decode_seq(key: &str, bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::CorruptValue {
        key: key.to_string(),
        len: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (CursorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn absent_cursor_reads_as_zero() {
        let (store, _dir) = temp_store();
        let id = ChannelId::from("C1");
        assert_eq!(store.get(&id, 1).unwrap(), 0);
    }

    #[test]
    fn set_then_get_round_trips() {
        let (store, _dir) = temp_store();
        let id = ChannelId::from("C1");
        store.set(&id, 1, 500).unwrap();
        assert_eq!(store.get(&id, 1).unwrap(), 500);
    }

    #[test]
    fn cursor_is_scoped_per_channel_type() {
        let (store, _dir) = temp_store();
        let id = ChannelId::from("C1");
        store.set(&id, 1, 500).unwrap();
        assert_eq!(store.get(&id, 2).unwrap(), 0);
    }

    #[test]
    fn iter_cursors_sees_every_write() {
        let (store, _dir) = temp_store();
        store.set(&ChannelId::from("A"), 1, 10).unwrap();
        store.set(&ChannelId::from("B"), 2, 20).unwrap();
        let mut seen: Vec<_> = store
            .iter_cursors()
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .into_iter()
            .map(|(id, ty, seq)| (id.as_str().to_string(), ty, seq))
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![("A".to_string(), 1, 10), ("B".to_string(), 2, 20)]
        );
    }

    #[test]
    fn reopen_after_close_preserves_cursor() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CursorStore::open(dir.path()).unwrap();
            store.set(&ChannelId::from("C1"), 1, 42).unwrap();
            store.close().unwrap();
        }
        let store = CursorStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&ChannelId::from("C1"), 1).unwrap(), 42);
    }
}
