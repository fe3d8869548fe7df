//! Shared doubles for integration tests
#![allow(dead_code)]

use anonchat_core::chat_types::{MessageKind, MessageRecord, MessageWrite, ModerationLevel};
use anonchat_core::error::{ChatError, Result};
use anonchat_core::identity::{Identity, IdentityProvider};
use anonchat_core::store::{MessageStore, StoreSubscription, StreamEvent, StreamUpdate, SubscribeOptions};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

/// Store driven by the test: stream deliveries are pushed by hand and
/// appends can be held back or made to fail.
#[derive(Clone)]
pub struct ManualStore {
    inner: Arc<Inner>,
}

struct Inner {
    streams: Mutex<Vec<(u64, mpsc::UnboundedSender<StreamEvent>)>>,
    next_stream: AtomicUsize,
    next_id: AtomicUsize,
    fail_appends: AtomicBool,
    held: AtomicBool,
    gate: Semaphore,
    appended: Mutex<Vec<MessageWrite>>,
}

impl ManualStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: Mutex::new(Vec::new()),
                next_stream: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                fail_appends: AtomicBool::new(false),
                held: AtomicBool::new(false),
                gate: Semaphore::new(0),
                appended: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn listeners(&self) -> usize {
        self.inner.streams.lock().unwrap().len()
    }

    pub fn appended(&self) -> Vec<MessageWrite> {
        self.inner.appended.lock().unwrap().clone()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.inner.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Appends wait until `release` is called
    pub fn hold_appends(&self) {
        self.inner.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, appends: usize) {
        self.inner.gate.add_permits(appends);
    }

    pub fn push(&self, update: StreamUpdate) {
        for (_, tx) in self.inner.streams.lock().unwrap().iter() {
            let _ = tx.send(StreamEvent::Update(update.clone()));
        }
    }

    pub fn fail_stream(&self, reason: &str) {
        for (_, tx) in self.inner.streams.lock().unwrap().iter() {
            let _ = tx.send(StreamEvent::Error(reason.to_string()));
        }
    }
}

impl MessageStore for ManualStore {
    fn append(&self, write: MessageWrite) -> BoxFuture<'static, Result<String>> {
        let inner = self.inner.clone();
        async move {
            if inner.held.load(Ordering::SeqCst) {
                let permit = inner
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| ChatError::Storage(e.to_string()))?;
                permit.forget();
            }
            if inner.fail_appends.load(Ordering::SeqCst) {
                return Err(ChatError::Storage("append rejected".to_string()));
            }
            inner.appended.lock().unwrap().push(write);
            let n = inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("srv-{}", n))
        }
        .boxed()
    }

    fn subscribe(&self, _room_id: &str, _options: SubscribeOptions) -> Result<StoreSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_stream.fetch_add(1, Ordering::SeqCst) as u64;
        let _ = tx.send(StreamEvent::Update(StreamUpdate::snapshot(Vec::new())));
        self.inner.streams.lock().unwrap().push((id, tx));

        let inner = self.inner.clone();
        Ok(StoreSubscription::new(rx, move || {
            inner.streams.lock().unwrap().retain(|(sid, _)| *sid != id);
        }))
    }
}

/// Identity provider that fails a given number of times before succeeding
pub struct FlakyIdentity {
    failures_left: AtomicUsize,
}

impl FlakyIdentity {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
        }
    }
}

impl IdentityProvider for FlakyIdentity {
    fn ensure_identity(&self) -> BoxFuture<'_, Result<Identity>> {
        async move {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ChatError::Authentication("token expired".to_string()));
            }
            Ok(Identity {
                uid: "user-1".to_string(),
                display_name: "Bright Wolf".to_string(),
            })
        }
        .boxed()
    }
}

pub fn record(id: &str, author_id: &str, content: &str, at: DateTime<Utc>) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        room_id: "lobby".to_string(),
        author_id: author_id.to_string(),
        author_name: "Someone".to_string(),
        content: content.to_string(),
        kind: MessageKind::User,
        created_at: at,
        moderation_level: ModerationLevel::Clean,
    }
}
