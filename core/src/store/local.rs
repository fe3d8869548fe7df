/// Local message store: chat history in sled with in-process fan-out
/// Frugal: one tree, keys ordered by room then timestamp
use crate::chat_types::{MessageRecord, MessageWrite};
use crate::error::{ChatError, Result};
use crate::store::{MessageStore, StoreSubscription, StreamEvent, StreamUpdate, SubscribeOptions};
use chrono::{DateTime, Duration, DurationRound, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

struct Subscriber {
    room_id: String,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

#[derive(Default)]
struct Fanout {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

#[derive(Clone)]
pub struct LocalStore {
    db: sled::Db,
    fanout: Arc<Mutex<Fanout>>,
}

impl LocalStore {
    /// Open (or create) the store under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("messages.db");
        let db = sled::open(&db_path)
            .map_err(|e| ChatError::Storage(format!("Failed to open messages DB: {}", e)))?;
        Ok(Self::with_db(db))
    }

    /// In-memory store, discarded on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| ChatError::Storage(format!("Failed to open temporary DB: {}", e)))?;
        Ok(Self::with_db(db))
    }

    fn with_db(db: sled::Db) -> Self {
        Self {
            db,
            fanout: Arc::new(Mutex::new(Fanout::default())),
        }
    }

    /// Number of live subscriptions across all rooms
    pub fn subscriber_count(&self) -> usize {
        lock(&self.fanout).subscribers.len()
    }

    /// Number of records stored for a room
    pub fn count(&self, room_id: &str) -> usize {
        self.db.scan_prefix(room_prefix(room_id)).count()
    }

    /// Last `limit` records of a room, oldest first
    pub fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let mut records = Vec::new();
        for entry in self.db.scan_prefix(room_prefix(room_id)).rev().take(limit) {
            let (_, value) = entry
                .map_err(|e| ChatError::Storage(format!("Failed to read messages: {}", e)))?;
            records.push(serde_json::from_slice::<MessageRecord>(&value)?);
        }
        records.reverse();
        Ok(records)
    }

    fn last_created_at(&self, room_id: &str) -> Result<Option<DateTime<Utc>>> {
        match self.db.scan_prefix(room_prefix(room_id)).next_back() {
            Some(entry) => {
                let (_, value) = entry
                    .map_err(|e| ChatError::Storage(format!("Failed to read messages: {}", e)))?;
                let record: MessageRecord = serde_json::from_slice(&value)?;
                Ok(Some(record.created_at))
            }
            None => Ok(None),
        }
    }

    fn insert(&self, write: MessageWrite) -> Result<MessageRecord> {
        let mut fanout = lock(&self.fanout);

        // created_at is strictly increasing per room, at the key's microsecond precision
        let now = Utc::now();
        let now = now.duration_trunc(Duration::microseconds(1)).unwrap_or(now);
        let created_at = match self.last_created_at(&write.room_id)? {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        };

        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            room_id: write.room_id,
            author_id: write.author_id,
            author_name: write.author_name,
            content: write.content,
            kind: write.kind,
            created_at,
            moderation_level: write.moderation_level,
        };

        let key = format!(
            "{}{:020}:{}",
            room_prefix(&record.room_id),
            record.created_at.timestamp_micros(),
            record.id
        );
        let value = serde_json::to_vec(&record)?;
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| ChatError::Storage(format!("Failed to save message: {}", e)))?;

        let update = StreamEvent::Update(StreamUpdate::incremental(vec![record.clone()]));
        fanout.subscribers.retain(|id, sub| {
            if sub.room_id != record.room_id {
                return true;
            }
            let alive = sub.tx.send(update.clone()).is_ok();
            if !alive {
                debug!("Dropping closed subscriber {}", id);
            }
            alive
        });

        Ok(record)
    }
}

impl MessageStore for LocalStore {
    fn append(&self, write: MessageWrite) -> BoxFuture<'static, Result<String>> {
        let store = self.clone();
        async move { store.insert(write).map(|record| record.id) }.boxed()
    }

    fn subscribe(&self, room_id: &str, options: SubscribeOptions) -> Result<StoreSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut fanout = lock(&self.fanout);
            let mut records = self.recent(room_id, options.limit)?;
            if !options.ascending {
                records.reverse();
            }
            // Initial delivery is the full current view
            let _ = tx.send(StreamEvent::Update(StreamUpdate::snapshot(records)));

            let id = fanout.next_id;
            fanout.next_id += 1;
            fanout.subscribers.insert(
                id,
                Subscriber {
                    room_id: room_id.to_string(),
                    tx,
                },
            );
            id
        };
        debug!("Subscriber {} attached to room {}", id, room_id);

        let fanout = self.fanout.clone();
        Ok(StoreSubscription::new(rx, move || {
            lock(&fanout).subscribers.remove(&id);
            debug!("Subscriber {} released", id);
        }))
    }
}

fn room_prefix(room_id: &str) -> String {
    // Length prefix keeps "a" from matching "a:b"
    format!("msg:{}:{}:", room_id.len(), room_id)
}

fn lock(fanout: &Mutex<Fanout>) -> MutexGuard<'_, Fanout> {
    fanout.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
